use hiwar::settings::SettingsStore;

#[tokio::main]
async fn main() -> Result<(), hiwar::AppError> {
    hiwar::init_tracing();

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    tracing::info!(path = ?settings_store.config_path(), "starting hiwar");

    let session = hiwar::bootstrap(&settings).await?;
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    hiwar::run(session, &settings, input, tokio::io::stdout()).await
}
