use std::time::Duration;

use filmdb_dal::attachment::{AttachmentRepositoryImpl, AttachmentType, CreateAttachment};
use filmdb_dal::film::FilmRepositoryImpl;
use filmdb_dal::{Error, ListingParams};
use futures::TryStreamExt as _;
use sqlx::Executor;

const TEST_DATA: &str = r#"
INSERT INTO film (id, title, release_date, rating) VALUES (1, 'Vetřelec', '1979-05-25', 8.5);
INSERT INTO film (id, title, rating) VALUES (2, 'Marečku, podejte mi pero', 7.9);
"#;

async fn init_db() -> sqlx::Pool<sqlx::Sqlite> {
    const DB_URL: &str = "sqlite::memory:";
    let conn = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .connect(DB_URL)
        .await
        .unwrap();
    conn.execute("PRAGMA foreign_keys = ON").await.unwrap();
    sqlx::migrate!("../../migrations").run(&conn).await.unwrap();

    conn.execute_many(TEST_DATA)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();

    conn
}

fn new_attachment(title: &str, film_id: i64) -> CreateAttachment {
    CreateAttachment {
        title: title.to_string(),
        film_id,
        kind: None,
        file_path: None,
    }
}

#[tokio::test]
async fn test_type_defaults_to_image() {
    let conn = init_db().await;
    let repo = AttachmentRepositoryImpl::new(conn);

    let attachment = repo.create(new_attachment("Plakát", 1)).await.unwrap();
    assert_eq!(attachment.kind, AttachmentType::Image);
    assert_eq!(attachment.to_string(), "Plakát (image)");

    let attachment = repo
        .create(CreateAttachment {
            kind: Some(AttachmentType::Video),
            file_path: Some("attachments/1/trailer.mp4".to_string()),
            ..new_attachment("Trailer", 1)
        })
        .await
        .unwrap();
    assert_eq!(attachment.kind, AttachmentType::Video);
    assert_eq!(
        attachment.file_path.as_deref(),
        Some("attachments/1/trailer.mp4")
    );
}

#[tokio::test]
async fn test_missing_film_reference() {
    let conn = init_db().await;
    let repo = AttachmentRepositoryImpl::new(conn);

    let err = repo.create(new_attachment("Plakát", 99)).await.unwrap_err();
    assert!(matches!(err, Error::MissingReference("Film")));
}

#[tokio::test]
async fn test_last_update_always_advances() {
    let conn = init_db().await;
    let repo = AttachmentRepositoryImpl::new(conn);

    let created = repo.create(new_attachment("Plakát", 1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    // an update with unchanged fields still moves the timestamp
    let updated = repo
        .update(created.id, new_attachment("Plakát", 1))
        .await
        .unwrap();
    assert!(updated.last_update > created.last_update);
}

#[tokio::test]
async fn test_listing_order() {
    let conn = init_db().await;
    let repo = AttachmentRepositoryImpl::new(conn);

    let older = repo.create(new_attachment("Plakát", 1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = repo.create(new_attachment("Scénář", 2)).await.unwrap();

    let attachments = repo.list(ListingParams::default()).await.unwrap();
    let ids: Vec<i64> = attachments.iter().map(|a| a.id).collect();
    assert_eq!(ids, [newer.id, older.id]);
}

#[tokio::test]
async fn test_delete_returns_file_path() {
    let conn = init_db().await;
    let repo = AttachmentRepositoryImpl::new(conn);

    let attachment = repo
        .create(CreateAttachment {
            file_path: Some("attachments/1/poster.jpg".to_string()),
            ..new_attachment("Plakát", 1)
        })
        .await
        .unwrap();

    let orphaned = repo.delete(attachment.id).await.unwrap();
    assert_eq!(orphaned.as_deref(), Some("attachments/1/poster.jpg"));

    let err = repo.get(attachment.id).await.unwrap_err();
    assert!(matches!(err, Error::RecordNotFound(_)));
    let err = repo.delete(attachment.id).await.unwrap_err();
    assert!(matches!(err, Error::RecordNotFound(_)));
}

#[tokio::test]
async fn test_film_delete_cascades_to_attachments() {
    let conn = init_db().await;
    let attachments = AttachmentRepositoryImpl::new(conn.clone());
    let films = FilmRepositoryImpl::new(conn);

    let poster = attachments
        .create(CreateAttachment {
            file_path: Some("attachments/1/poster.jpg".to_string()),
            ..new_attachment("Plakát", 1)
        })
        .await
        .unwrap();
    let script = attachments
        .create(CreateAttachment {
            kind: Some(AttachmentType::Text),
            ..new_attachment("Scénář", 1)
        })
        .await
        .unwrap();
    let unrelated = attachments.create(new_attachment("Plakát", 2)).await.unwrap();

    let orphaned = films.delete(1).await.unwrap();
    assert_eq!(orphaned, ["attachments/1/poster.jpg"]);

    for id in [poster.id, script.id] {
        let err = attachments.get(id).await.unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));
    }
    let err = films.get(1).await.unwrap_err();
    assert!(matches!(err, Error::RecordNotFound(_)));

    // the other film and its attachment are untouched
    attachments.get(unrelated.id).await.unwrap();
    films.get(2).await.unwrap();
}
