use log::{error, info};
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};
use rocket::fairing::AdHoc;

use crate::models::{EngagementRecord, Review, WorkerProfile};

pub fn init() -> AdHoc {
    AdHoc::on_ignite("MongoDB", |rocket| async {
        match connect().await {
            Ok(database) => {
                info!("✓ MongoDB connected successfully");
                if let Err(e) = ensure_indexes(&database).await {
                    error!("✗ Failed to ensure indexes: {}", e);
                }
                rocket.manage(database)
            }
            Err(e) => {
                error!("✗ Failed to connect to MongoDB: {}", e);
                rocket
            }
        }
    })
}

async fn connect() -> Result<Database, mongodb::error::Error> {
    let uri = crate::config::Config::mongodb_uri();
    let client = Client::with_uri_str(&uri).await?;

    // Test connection
    client
        .database("admin")
        .run_command(doc! {"ping": 1}, None)
        .await?;

    Ok(client.database("hirelocal"))
}

/// The engine leans on three indexes: the geo index behind `$geoNear`
/// matching, the unique `(ancestry_id, worker_id)` pair that makes fan-out
/// insert races harmless, and the unique review-per-engagement constraint.
async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    db.collection::<WorkerProfile>("worker_profiles")
        .create_index(
            IndexModel::builder()
                .keys(doc! { "location": "2dsphere" })
                .build(),
            None,
        )
        .await?;

    db.collection::<EngagementRecord>("engagements")
        .create_index(
            IndexModel::builder()
                .keys(doc! { "ancestry_id": 1, "worker_id": 1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! {
                            "ancestry_id": { "$type": "objectId" },
                            "worker_id": { "$type": "objectId" },
                        })
                        .build(),
                )
                .build(),
            None,
        )
        .await?;

    db.collection::<Review>("reviews")
        .create_index(
            IndexModel::builder()
                .keys(doc! { "engagement_id": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            None,
        )
        .await?;

    info!("✓ Indexes ensured");
    Ok(())
}

pub fn is_duplicate_key_error(error: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        _ => false,
    }
}

pub type DbConn = Database;
