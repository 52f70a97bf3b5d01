use env_logger::Env;
use wolfzy::{Config, app};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::load();
    log::info!(
        "serving {} with users from {}",
        config.sales_csv.display(),
        config.users_db.display()
    );

    app::run(config).await?;

    Ok(())
}
