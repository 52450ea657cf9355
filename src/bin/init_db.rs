use feishu_bot::config::Settings;
use feishu_bot::database::Database;
use feishu_bot::schema::Schema;
use std::process;

#[tokio::main]
async fn main() {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("[init] Failed to load configuration: {err}");
            process::exit(1);
        }
    };

    println!("[init] Connecting to database: {}", settings.database_url);
    let db = match Database::connect(&settings).await {
        Ok(db) => db,
        Err(err) => {
            eprintln!("[init] Database connection failed: {err}");
            process::exit(1);
        }
    };

    let schema = Schema::registered();
    if let Err(err) = db.create_all(&schema).await {
        eprintln!("[init] Schema initialisation failed: {err}");
        db.dispose().await;
        process::exit(1);
    }
    db.dispose().await;

    println!(
        "[init] Database schema initialised ({} tables).",
        schema.tables().len()
    );
}
