/// Synchronous argument validation for commands
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Player name cannot be empty")]
    PlayerNameEmpty,

    #[error("Player name too long (max 16 characters, got {0})")]
    PlayerNameTooLong(usize),

    #[error("Player name contains invalid characters (only alphanumeric and underscore allowed)")]
    PlayerNameInvalidChars,

    #[error("Too many arguments (expected at most {max}, got {actual})")]
    TooManyArguments { max: usize, actual: usize },

    #[error("Usage: {0}")]
    MissingArgument(&'static str),

    #[error("Unknown color '{0}'")]
    UnknownColor(String),

    #[error("Only players can use this command")]
    PlayersOnly,

    #[error("You cannot target yourself")]
    CannotTargetSelf,
}

/// Validates a player name
///
/// Rules:
/// - Cannot be empty
/// - Max 16 characters
/// - Only alphanumeric characters and underscores
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::PlayerNameEmpty);
    }

    if name.len() > 16 {
        return Err(ValidationError::PlayerNameTooLong(name.len()));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::PlayerNameInvalidChars);
    }

    Ok(())
}

/// Validates the argument count of a command
pub fn validate_arg_count(args: &[&str], max: usize) -> Result<(), ValidationError> {
    if args.len() > max {
        return Err(ValidationError::TooManyArguments {
            max,
            actual: args.len(),
        });
    }
    Ok(())
}
