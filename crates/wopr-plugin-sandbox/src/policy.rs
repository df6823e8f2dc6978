//! Tool-invocation policy: compiled allow/deny patterns with deny-wins.

use regex_lite::Regex;
use tracing::warn;
use wopr_sandbox_types::SandboxToolPolicy;

/// A compiled tool pattern. Patterns are compiled once per policy so
/// evaluation never re-parses.
#[derive(Debug, Clone)]
enum ToolPattern {
    All,
    Exact(String),
    Glob(Regex),
}

impl ToolPattern {
    /// Compile one raw pattern. Blank patterns are dropped.
    fn compile(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        if normalized == "*" {
            return Some(Self::All);
        }
        if !normalized.contains('*') {
            return Some(Self::Exact(normalized));
        }
        let mut pattern = String::from("^");
        let mut first = true;
        for part in normalized.split('*') {
            if !first {
                pattern.push_str(".*");
            }
            first = false;
            push_escaped(&mut pattern, part);
        }
        pattern.push('$');
        match Regex::new(&pattern) {
            Ok(re) => Some(Self::Glob(re)),
            Err(e) => {
                warn!(pattern = %raw, error = %e, "Dropping uncompilable tool pattern");
                None
            }
        }
    }

    fn matches(&self, normalized_name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exact(s) => s == normalized_name,
            Self::Glob(re) => re.is_match(normalized_name),
        }
    }
}

fn push_escaped(pattern: &mut String, literal: &str) {
    for c in literal.chars() {
        if matches!(
            c,
            '.' | '+' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '\\'
        ) {
            pattern.push('\\');
        }
        pattern.push(c);
    }
}

fn compile_list(patterns: Option<&[String]>) -> Vec<ToolPattern> {
    patterns
        .unwrap_or(&[])
        .iter()
        .filter_map(|p| ToolPattern::compile(p))
        .collect()
}

/// A policy with its patterns compiled.
#[derive(Debug, Default)]
pub struct CompiledToolPolicy {
    allow: Vec<ToolPattern>,
    deny: Vec<ToolPattern>,
}

impl CompiledToolPolicy {
    pub fn compile(policy: &SandboxToolPolicy) -> Self {
        Self {
            allow: compile_list(policy.allow.as_deref()),
            deny: compile_list(policy.deny.as_deref()),
        }
    }

    /// Deny wins; an empty allow list allows everything not denied.
    pub fn is_allowed(&self, tool_name: &str) -> bool {
        let normalized = tool_name.trim().to_lowercase();
        if self.deny.iter().any(|p| p.matches(&normalized)) {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|p| p.matches(&normalized))
    }
}

/// One-shot evaluation of `tool_name` against `policy`.
pub fn is_tool_allowed(policy: &SandboxToolPolicy, tool_name: &str) -> bool {
    CompiledToolPolicy::compile(policy).is_allowed(tool_name)
}

/// Result of partitioning a tool list against a policy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilteredTools {
    pub allowed: Vec<String>,
    pub denied: Vec<String>,
}

/// Partition `tools` into allowed and denied, preserving input order.
pub fn filter_tools_by_policy(tools: &[String], policy: &SandboxToolPolicy) -> FilteredTools {
    let compiled = CompiledToolPolicy::compile(policy);
    let mut result = FilteredTools::default();
    for tool in tools {
        if compiled.is_allowed(tool) {
            result.allowed.push(tool.clone());
        } else {
            result.denied.push(tool.clone());
        }
    }
    result
}
