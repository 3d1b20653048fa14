pub mod admin;
pub mod health;
pub mod orders;
pub mod payments;

use validator::ValidationErrors;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Flattens field errors into `field: message` lines for [`crate::ApiResponse::validation_errors`].
pub(crate) fn validation_messages(errors: &ValidationErrors) -> Vec<String> {
    let mut messages: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            let field = field.to_string();
            errors.iter().map(move |error| {
                format!(
                    "{}: {}",
                    field,
                    error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Invalid value".to_string())
                )
            })
        })
        .collect();
    messages.sort();
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Probe {
        #[validate(length(min = 1, message = "reason is required"))]
        reason: String,
        #[validate(length(max = 3))]
        code: String,
    }

    #[test]
    fn messages_name_the_field_and_fall_back_to_a_default() {
        let errors = Probe {
            reason: String::new(),
            code: "ABCDE".to_string(),
        }
        .validate()
        .unwrap_err();

        assert_eq!(
            validation_messages(&errors),
            vec![
                "code: Invalid value".to_string(),
                "reason: reason is required".to_string()
            ]
        );
    }
}
