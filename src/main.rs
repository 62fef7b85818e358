mod cli;
mod conf;
mod dispatch;
mod events;
mod http;
mod logging;
mod models;
mod objectstore;
mod runner;
mod scheduler;
mod schema;
mod storage;
mod volume;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    cli::init().await
}
