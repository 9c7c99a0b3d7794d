//! TypeScript type stripping using OXC
//!
//! Main procedures may be written in TypeScript. Before they are embedded in
//! a bootstrap script their type syntax is removed with the OXC toolchain
//! (parser, semantic, transformer, codegen).

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{TransformOptions, Transformer};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during TypeScript transpilation
#[derive(Error, Debug)]
pub enum TranspileError {
    #[error("Failed to parse TypeScript: {0}")]
    ParseError(String),

    #[error("Failed to transform TypeScript: {0}")]
    TransformError(String),

    #[error("Invalid source type: {0}")]
    InvalidSourceType(String),
}

/// Result type for transpilation operations
pub type TranspileResult<T> = Result<T, TranspileError>;

/// TypeScript transpiler that converts TypeScript to JavaScript
#[derive(Debug, Clone)]
pub struct Transpiler;

impl Transpiler {
    pub fn new() -> Self {
        Self
    }

    /// Transpile TypeScript source code to JavaScript
    ///
    /// `filename` selects the source type (`.ts`, `.mts`, `.js`, ...).
    pub fn transpile(&self, source: &str, filename: &str) -> TranspileResult<String> {
        let allocator = Allocator::default();

        // Determine source type from filename
        let source_type = SourceType::from_path(filename).map_err(|e| {
            TranspileError::InvalidSourceType(format!("Unknown file extension: {:?}", e))
        })?;

        // Parse the TypeScript source
        let parser_return = Parser::new(&allocator, source, source_type).parse();

        // Check for parse errors
        if !parser_return.errors.is_empty() {
            let error_messages: Vec<String> = parser_return
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect();
            return Err(TranspileError::ParseError(error_messages.join("\n")));
        }

        let mut program = parser_return.program;

        // Build semantic information (scoping) for the transformer
        let semantic_ret = SemanticBuilder::new().build(&program);
        for error in &semantic_ret.errors {
            tracing::warn!("semantic warning in {}: {}", filename, error);
        }
        let scoping = semantic_ret.semantic.into_scoping();

        // Strip TypeScript syntax
        let transform_options = TransformOptions::default();
        let transformer_return = Transformer::new(&allocator, Path::new(filename), &transform_options)
            .build_with_scoping(scoping, &mut program);

        if !transformer_return.errors.is_empty() {
            let error_messages: Vec<String> = transformer_return
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect();
            return Err(TranspileError::TransformError(error_messages.join("\n")));
        }

        // Generate JavaScript code
        let codegen_return = Codegen::new()
            .with_options(CodegenOptions::default())
            .build(&program);

        Ok(codegen_return.code)
    }

    /// Strip types from a single TypeScript expression
    ///
    /// The expression is parenthesized before transpiling so that anonymous
    /// `function` expressions are not read as declarations. The trailing
    /// statement terminator codegen adds is removed.
    pub fn transpile_expression(&self, source: &str) -> TranspileResult<String> {
        let wrapped = format!("({}\n)", source);
        let js = self.transpile(&wrapped, "main.ts")?;
        Ok(js.trim_end().trim_end_matches(';').trim_end().to_string())
    }
}

impl Default for Transpiler {
    fn default() -> Self {
        Self::new()
    }
}
