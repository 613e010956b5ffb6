//! Priority classification of GraphQL operations
//!
//! Callers normally know what they are sending and pass an explicit
//! [`OperationKind`]. When they don't, [`classify`] falls back to a substring
//! heuristic over the operation body:
//!
//! 1. `query`, `profesorPorId`, `asignaturaPorId` → high priority
//! 2. `mutation`, `crear`, `actualizar` → normal priority
//! 3. anything else (deletions, empty bodies) → low priority
//!
//! The heuristic is not a parser. A mutation that selects a field named
//! `query`, or an operation whose name merely contains one of the tokens,
//! lands in the wrong lane.

use crate::queues::QueueName;
use serde::{Deserialize, Serialize};

const READ_TOKENS: &[&str] = &["query", "profesorPorId", "asignaturaPorId"];
const WRITE_TOKENS: &[&str] = &["mutation", "crear", "actualizar"];

/// Coarse operation shape used to pick a priority lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Read-only operation
    Query,
    /// Create/update operation
    Mutation,
    /// Deletion or unrecognized operation
    Deletion,
}

impl OperationKind {
    /// Infer the kind from an operation body with the substring heuristic
    pub fn infer(operation_body: &str) -> Self {
        if READ_TOKENS.iter().any(|t| operation_body.contains(t)) {
            OperationKind::Query
        } else if WRITE_TOKENS.iter().any(|t| operation_body.contains(t)) {
            OperationKind::Mutation
        } else {
            OperationKind::Deletion
        }
    }

    /// Lane this kind is dispatched to
    pub fn queue(&self) -> QueueName {
        match self {
            OperationKind::Query => QueueName::HighPriority,
            OperationKind::Mutation => QueueName::NormalPriority,
            OperationKind::Deletion => QueueName::LowPriority,
        }
    }
}

/// Heuristic lane for an operation body
pub fn classify(operation_body: &str) -> QueueName {
    OperationKind::infer(operation_body).queue()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_query_is_high_priority() {
        assert_eq!(classify("query { holaMundo }"), QueueName::HighPriority);
        assert_eq!(
            classify("query ($id: ID!) { profesorPorId(id: $id) { id } }"),
            QueueName::HighPriority
        );
    }

    #[test]
    fn test_named_reads_without_query_keyword() {
        assert_eq!(
            classify("{ profesorPorId(id: 1) { id } }"),
            QueueName::HighPriority
        );
        assert_eq!(
            classify("{ asignaturaPorId(id: 1) { nombre } }"),
            QueueName::HighPriority
        );
    }

    #[test]
    fn test_mutations_are_normal_priority() {
        let body = r#"
            mutation ($nombre: String!, $documento: String!, $area: String!) {
              crearProfesor(nombre: $nombre, documento: $documento, area: $area) { id }
            }
        "#;
        assert_eq!(classify(body), QueueName::NormalPriority);
        assert_eq!(
            classify("{ actualizarAsignatura(id: 1) { id } }"),
            QueueName::NormalPriority
        );
    }

    #[test]
    fn test_deletions_are_low_priority() {
        assert_eq!(classify("{ eliminarProfesor(id: 7) }"), QueueName::LowPriority);
    }

    #[test]
    fn test_empty_body_is_low_priority() {
        assert_eq!(classify(""), QueueName::LowPriority);
    }

    #[test]
    fn test_anonymous_shorthand_query_is_low_priority() {
        // `{ holaMundo }` carries none of the tokens
        assert_eq!(classify("{ holaMundo }"), QueueName::LowPriority);
    }

    #[test]
    fn test_known_misclassification() {
        // A mutation selecting a `query` field is treated as a read
        let body = "mutation { eliminarProfesor(id: 1) { query } }";
        assert_eq!(classify(body), QueueName::HighPriority);
    }

    #[test]
    fn test_explicit_kind_mapping() {
        assert_eq!(OperationKind::Query.queue(), QueueName::HighPriority);
        assert_eq!(OperationKind::Mutation.queue(), QueueName::NormalPriority);
        assert_eq!(OperationKind::Deletion.queue(), QueueName::LowPriority);
    }

    proptest! {
        #[test]
        fn prop_bodies_containing_query_are_high_priority(
            prefix in ".*",
            suffix in ".*",
        ) {
            let body = format!("{}query{}", prefix, suffix);
            prop_assert_eq!(classify(&body), QueueName::HighPriority);
        }

        #[test]
        fn prop_classification_never_yields_error_queue(body in ".*") {
            prop_assert_ne!(classify(&body), QueueName::Error);
        }
    }
}
