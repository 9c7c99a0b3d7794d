//! Bootstrap script composition
//!
//! A worker is never handed the caller's main procedure directly. It runs a
//! small bootstrap that first announces itself to its creator, then waits
//! for the start sentinel before invoking the main procedure. Policy blocks
//! are often reported late or not at all, so a positive "I am running"
//! message is the only reliable liveness signal.

use oxc_allocator::Allocator;
use oxc_ast::ast::{Expression, Statement};
use oxc_parser::Parser;
use oxc_span::SourceType;

use crate::error::{WorkerError, WorkerResult};
use crate::transpiler::Transpiler;

/// Posted by the bootstrap as soon as it starts executing
pub const READY_SENTINEL: &str = "workerOk";

/// Posted by the creator once readiness has been observed
pub const START_SENTINEL: &str = "startMain";

/// Source text of a callable JavaScript value, validated up front
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerMain {
    source: String,
}

impl WorkerMain {
    /// Validate `source` as a callable expression.
    ///
    /// Accepts what `typeof v === 'function'` accepts for literal
    /// expressions: arrow functions, function expressions and class
    /// expressions, optionally parenthesized. Anything else, including
    /// source that does not parse or carries more than one expression, is
    /// rejected as not callable.
    pub fn parse(source: &str) -> WorkerResult<Self> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(WorkerError::not_callable("empty source"));
        }

        // Parse exactly the text `compose` will place in argument position
        let wrapped = format!("(\n{}\n)", trimmed);
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &wrapped, SourceType::mjs()).parse();

        // Check for parse errors
        if !ret.errors.is_empty() {
            let messages: Vec<String> = ret.errors.iter().map(|e| e.to_string()).collect();
            return Err(WorkerError::not_callable(messages.join("; ")));
        }

        // The wrapping parentheses must enclose one expression and nothing else
        let expression = match (ret.program.directives.is_empty(), &ret.program.body[..]) {
            (true, [Statement::ExpressionStatement(stmt)])
                if stmt.span.start == 0 && stmt.span.end as usize == wrapped.len() =>
            {
                &stmt.expression
            }
            _ => {
                return Err(WorkerError::not_callable(
                    "expected a single expression, found trailing statements",
                ));
            }
        };

        match expression.without_parentheses() {
            Expression::ArrowFunctionExpression(_)
            | Expression::FunctionExpression(_)
            | Expression::ClassExpression(_) => Ok(Self {
                source: trimmed.to_string(),
            }),
            other => Err(WorkerError::not_callable(format!(
                "expected a function expression, found {}",
                describe(other)
            ))),
        }
    }

    /// Strip TypeScript syntax from `source`, then validate it like [`WorkerMain::parse`]
    pub fn from_typescript(source: &str) -> WorkerResult<Self> {
        if source.trim().is_empty() {
            return Err(WorkerError::not_callable("empty source"));
        }
        let js = Transpiler::new()
            .transpile_expression(source)
            .map_err(|e| WorkerError::not_callable(e.to_string()))?;
        Self::parse(&js)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

fn describe(expression: &Expression<'_>) -> &'static str {
    match expression {
        Expression::StringLiteral(_) | Expression::TemplateLiteral(_) => "a string",
        Expression::NumericLiteral(_) | Expression::BigIntLiteral(_) => "a number",
        Expression::BooleanLiteral(_) => "a boolean",
        Expression::NullLiteral(_) => "null",
        Expression::ObjectExpression(_) => "an object",
        Expression::ArrayExpression(_) => "an array",
        Expression::Identifier(_) => "an identifier reference",
        Expression::CallExpression(_) => "a call expression",
        _ => "a non-callable expression",
    }
}

/// Script text that performs the handshake, then runs a [`WorkerMain`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapScript {
    text: String,
}

impl BootstrapScript {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl AsRef<str> for BootstrapScript {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// Wrap `main` into a self-contained bootstrap script.
pub fn compose(main: &WorkerMain) -> BootstrapScript {
    let ready = serde_json::Value::from(READY_SENTINEL);
    let start = serde_json::Value::from(START_SENTINEL);

    // The main source goes on its own lines so a trailing line comment
    // cannot swallow the closing parenthesis.
    let text = format!(
        r#"((main) => {{
    self.postMessage({ready});
    self.onmessage = (e) => {{
        if (e.data === {start}) {{
            self.onmessage = null;
            main();
        }}
    }};
}})(
{main}
);
"#,
        ready = ready,
        start = start,
        main = main.source(),
    );

    BootstrapScript { text }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_callables() {
        for source in [
            "() => {}",
            "(e) => postMessage(e)",
            "function () { postMessage(1) }",
            "async function main() {}",
            "(() => { onmessage = e => postMessage(e.data * 2) })",
            "class Main {}",
        ] {
            assert!(WorkerMain::parse(source).is_ok(), "rejected {source}");
        }
    }

    #[test]
    fn test_rejects_non_callables() {
        for source in [
            "'()=>self.postMessage(\"test\")'",
            "null",
            "42",
            "{ a: 1 }",
            "main",
            "",
            "() =>",
        ] {
            let err = WorkerMain::parse(source).unwrap_err();
            assert!(matches!(err, WorkerError::NotCallable { .. }), "accepted {source}");
            assert_eq!(err.to_string(), "Worker main must be a function");
        }
    }

    #[test]
    fn test_typescript_main() {
        let main = WorkerMain::from_typescript(
            "() => { onmessage = (e: MessageEvent<number>) => postMessage(e.data * 2) }",
        )
        .unwrap();
        assert!(!main.source().contains("MessageEvent"));
    }

    #[test]
    fn test_rejects_trailing_statements() {
        for source in [
            "() => {};",
            "() => {})\n;postMessage('ran-before-start');(() => {}",
            "function () {}); (function () {}",
            "() => {}\n(() => {})()",
            "(() => {}), 1",
        ] {
            let err = WorkerMain::parse(source).unwrap_err();
            assert!(matches!(err, WorkerError::NotCallable { .. }), "accepted {source:?}");
        }
    }

    #[test]
    fn test_typescript_rejects_trailing_statements() {
        let err = WorkerMain::from_typescript("(x: number) => {})\n;evil();(() => {}").unwrap_err();
        assert!(matches!(err, WorkerError::NotCallable { .. }));
    }

    #[test]
    fn test_trailing_comments_allowed() {
        assert!(WorkerMain::parse("() => {} // done").is_ok());
        assert!(WorkerMain::parse("function () {} /* end */").is_ok());
    }

    #[test]
    fn test_compose_order() {
        let main = WorkerMain::parse("() => postMessage('hi') // trailing").unwrap();
        let script = compose(&main);
        let text = script.text();

        let ready = text.find("\"workerOk\"").unwrap();
        let start = text.find("\"startMain\"").unwrap();
        let reset = text.find("self.onmessage = null").unwrap();
        let call = text.find("main();").unwrap();
        assert!(ready < start && start < reset && reset < call);
        assert!(text.contains("postMessage('hi') // trailing\n);"));
    }

    #[test]
    fn test_composed_script_parses() {
        let main = WorkerMain::parse("function () { throw new Error('x') }").unwrap();
        let script = compose(&main);

        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, script.text(), SourceType::cjs()).parse();
        assert!(ret.errors.is_empty());
    }
}
