use std::io::{BufRead, IsTerminal, Write};

use bringup_core::cluster::{ConflictPolicy, ConflictResolver};

/// Asks the operator on the terminal whether to recreate an existing
/// cluster. Without a terminal the cluster is reused.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptResolver;

impl ConflictResolver for PromptResolver {
    fn resolve(&self, cluster: &str) -> ConflictPolicy {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return ConflictPolicy::Reuse;
        }
        eprint!("Cluster '{cluster}' already exists. Delete and recreate? [y/N] ");
        let _ = std::io::stderr().flush();

        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer).is_err() {
            return ConflictPolicy::Reuse;
        }
        parse_answer(&answer)
    }
}

/// `y`/`yes` recreates; anything else, including an empty line, reuses.
pub fn parse_answer(answer: &str) -> ConflictPolicy {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ConflictPolicy::Recreate,
        _ => ConflictPolicy::Reuse,
    }
}
