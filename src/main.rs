#[tokio::main]
async fn main() -> std::io::Result<()> {
    dustforce_duel_server::run_with_config().await
}
