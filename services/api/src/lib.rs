mod cli;
mod evaluate;
mod infra;
mod routes;
mod server;

use survey_lifecycle::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
