mod cli;
mod commands;
mod infra;

use wnv_outbreak::error::AppError;

pub fn run() -> Result<(), AppError> {
    cli::run()
}
