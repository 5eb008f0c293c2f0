//! Command error types.

use thiserror::Error;

use meshgrid_fleet::FleetError;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("argument mismatch --- usage: {usage}")]
    ArgumentMismatch { command: String, usage: String },

    #[error("argument value error in {command} --- {message}")]
    ArgumentValue { command: String, message: String },

    #[error("unavailable server --- {0} does not exist in the mesh")]
    UnavailableServer(String),

    #[error("invalid command --- {0} is not a valid command")]
    InvalidCommand(String),

    #[error("fleet error: {0}")]
    Fleet(#[from] FleetError),

    #[error("log sink error: {0}")]
    Sink(#[from] std::io::Error),
}

pub type CommandResult<T> = Result<T, CommandError>;
