//! Validation of generation requests before they reach the network.

use crate::error::CoreError;

/// Maximum length of a model identifier (e.g. `fal-ai/flux/dev`).
const MAX_MODEL_ID_LEN: usize = 256;

/// Validate a model identifier.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_MODEL_ID_LEN` characters.
/// - Segments are separated by `/`; no segment may be empty.
/// - Must contain only alphanumeric, hyphen, underscore, dot, or slash characters.
pub fn validate_model_id(model: &str) -> Result<(), CoreError> {
    if model.is_empty() {
        return Err(CoreError::Validation(
            "Model identifier must not be empty".to_string(),
        ));
    }
    if model.len() > MAX_MODEL_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Model identifier must not exceed {MAX_MODEL_ID_LEN} characters"
        )));
    }
    if model.split('/').any(str::is_empty) {
        return Err(CoreError::Validation(format!(
            "Model identifier '{model}' contains an empty path segment"
        )));
    }
    if !model
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(CoreError::Validation(format!(
            "Model identifier '{model}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Validate the input payload of a generation request.
///
/// The queue API expects a JSON object of model parameters.
pub fn validate_input(input: &serde_json::Value) -> Result<(), CoreError> {
    if !input.is_object() {
        return Err(CoreError::Validation(
            "Request input must be a JSON object".to_string(),
        ));
    }
    Ok(())
}
