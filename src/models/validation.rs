use validator::ValidationError;

// Field-level rules that the validator derive has no built-in for.

/// Non-empty and ASCII digits only (postal codes, shard keys)
pub fn validate_numeric(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::new("numeric"));
    }
    Ok(())
}

/// Non-empty and ASCII letters only (locales, currency codes)
pub fn validate_alpha(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(ValidationError::new("alpha"));
    }
    Ok(())
}

/// International format: anything starting with `+`. Strict E.164 numbers
/// are a subset of that, so formatted numbers like `+7 (999) 000-00-00` pass.
pub fn validate_phone(value: &str) -> Result<(), ValidationError> {
    if !value.starts_with('+') {
        return Err(ValidationError::new("phone"));
    }
    Ok(())
}
