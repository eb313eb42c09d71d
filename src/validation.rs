use crate::error::CoreError;

/// Namespace and repo names share one grammar (spec.md §3):
/// `^[A-Za-z0-9][A-Za-z0-9._-]*$`, no `..`, no path separators.
pub fn validate_name(name: &str) -> Result<(), CoreError> {
    let mut chars = name.chars();
    let first = chars
        .next()
        .ok_or_else(|| CoreError::InvalidArgument("name must not be empty".to_string()))?;

    if !first.is_ascii_alphanumeric() {
        return Err(CoreError::InvalidArgument(
            "name must start with a letter or digit".to_string(),
        ));
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
        return Err(CoreError::InvalidArgument(
            "name may only contain letters, digits, '.', '_', '-'".to_string(),
        ));
    }

    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(CoreError::InvalidArgument(
            "name must not contain '..' or path separators".to_string(),
        ));
    }

    Ok(())
}
