//! Append-only point ledger and the denormalized `users.points` total it
//! feeds. Rows are never updated or deleted; the schema enforces that with
//! triggers.

use chrono::Utc;
use serde::Serialize;
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::error::AppError;
use crate::models::{DbPointTransaction, PointTransaction};

/// Credits `points` to the user and appends the matching ledger row. Must run
/// inside the caller's transaction so both writes land together.
#[instrument(skip(conn, action))]
pub async fn award_points(
    conn: &mut SqliteConnection,
    user_id: i64,
    lesson_id: Option<i64>,
    points: i64,
    action: &str,
) -> Result<PointTransaction, AppError> {
    if points <= 0 {
        return Err(AppError::Internal(format!(
            "Refusing to record non-positive award of {} points",
            points
        )));
    }

    let updated = sqlx::query("UPDATE users SET points = points + ? WHERE id = ?")
        .bind(points)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }

    let row = sqlx::query_as::<_, DbPointTransaction>(
        "INSERT INTO point_transactions (user_id, lesson_id, points, action, created_at)
         VALUES (?, ?, ?, ?, ?)
         RETURNING id, user_id, lesson_id, points, action, created_at",
    )
    .bind(user_id)
    .bind(lesson_id)
    .bind(points)
    .bind(action)
    .bind(Utc::now().naive_utc())
    .fetch_one(&mut *conn)
    .await?;

    info!(points, "Points awarded");
    Ok(PointTransaction::from(row))
}

#[instrument]
pub async fn list_transactions(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<PointTransaction>, AppError> {
    info!("Listing point transactions");
    let rows = sqlx::query_as::<_, DbPointTransaction>(
        "SELECT id, user_id, lesson_id, points, action, created_at
         FROM point_transactions
         WHERE user_id = ?
         ORDER BY id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(PointTransaction::from).collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub user_id: i64,
    pub stored_total: i64,
    pub ledger_total: i64,
}

impl Reconciliation {
    pub fn is_balanced(&self) -> bool {
        self.stored_total == self.ledger_total
    }
}

#[derive(sqlx::FromRow)]
struct ReconciliationRow {
    user_id: i64,
    stored_total: i64,
    ledger_total: i64,
}

impl From<ReconciliationRow> for Reconciliation {
    fn from(row: ReconciliationRow) -> Self {
        Self {
            user_id: row.user_id,
            stored_total: row.stored_total,
            ledger_total: row.ledger_total,
        }
    }
}

const RECONCILIATION_QUERY: &str = "SELECT u.id AS user_id,
            u.points AS stored_total,
            COALESCE((SELECT SUM(t.points) FROM point_transactions t WHERE t.user_id = u.id), 0)
                AS ledger_total
     FROM users u";

#[instrument]
pub async fn ledger_total(pool: &Pool<Sqlite>, user_id: i64) -> Result<i64, AppError> {
    let (total,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(points), 0) FROM point_transactions WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(total)
}

#[instrument]
pub async fn reconcile_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Reconciliation, AppError> {
    let stored: Option<(i64,)> = sqlx::query_as("SELECT points FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    let Some((stored_total,)) = stored else {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    };

    Ok(Reconciliation {
        user_id,
        stored_total,
        ledger_total: ledger_total(pool, user_id).await?,
    })
}

/// Every user whose stored total disagrees with the sum of their ledger rows.
#[instrument(skip(pool))]
pub async fn find_discrepancies(pool: &Pool<Sqlite>) -> Result<Vec<Reconciliation>, AppError> {
    let rows = sqlx::query_as::<_, ReconciliationRow>(&format!(
        "SELECT * FROM ({}) WHERE stored_total != ledger_total ORDER BY user_id",
        RECONCILIATION_QUERY
    ))
    .fetch_all(pool)
    .await?;

    let discrepancies: Vec<Reconciliation> =
        rows.into_iter().map(Reconciliation::from).collect();

    for d in &discrepancies {
        warn!(
            user_id = d.user_id,
            stored_total = d.stored_total,
            ledger_total = d.ledger_total,
            "Point total does not match ledger"
        );
    }

    Ok(discrepancies)
}

#[cfg(test)]
mod tests {
    use super::{award_points, find_discrepancies, list_transactions, reconcile_user};
    use crate::test::test_db::TestDbBuilder;

    #[rocket::async_test]
    async fn award_updates_total_and_appends_row() {
        let test_db = TestDbBuilder::new()
            .member("learner", None)
            .build()
            .await
            .expect("Failed to build test database");
        let user_id = test_db.user_id("learner").unwrap();

        let mut tx = test_db.pool.begin().await.unwrap();
        let entry = award_points(&mut tx, user_id, None, 15, "Welcome bonus")
            .await
            .expect("award failed");
        tx.commit().await.unwrap();

        assert_eq!(entry.points, 15);
        assert_eq!(entry.action, "Welcome bonus");

        let transactions = list_transactions(&test_db.pool, user_id).await.unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(
            reconcile_user(&test_db.pool, user_id).await.unwrap().ledger_total,
            15
        );

        let reconciliation = reconcile_user(&test_db.pool, user_id).await.unwrap();
        assert_eq!(reconciliation.stored_total, 15);
        assert!(reconciliation.is_balanced());
    }

    #[rocket::async_test]
    async fn rolled_back_award_leaves_no_trace() {
        let test_db = TestDbBuilder::new()
            .member("learner", None)
            .build()
            .await
            .expect("Failed to build test database");
        let user_id = test_db.user_id("learner").unwrap();

        {
            let mut tx = test_db.pool.begin().await.unwrap();
            award_points(&mut tx, user_id, None, 20, "Never committed")
                .await
                .unwrap();
            tx.rollback().await.unwrap();
        }

        let reconciliation = reconcile_user(&test_db.pool, user_id).await.unwrap();
        assert_eq!(reconciliation.stored_total, 0);
        assert_eq!(reconciliation.ledger_total, 0);
    }

    #[rocket::async_test]
    async fn rejects_non_positive_awards() {
        let test_db = TestDbBuilder::new()
            .member("learner", None)
            .build()
            .await
            .expect("Failed to build test database");
        let user_id = test_db.user_id("learner").unwrap();

        let mut conn = test_db.pool.acquire().await.unwrap();
        assert!(award_points(&mut conn, user_id, None, 0, "nothing").await.is_err());
        assert!(award_points(&mut conn, user_id, None, -5, "debit").await.is_err());
    }

    #[rocket::async_test]
    async fn ledger_rows_are_immutable() {
        let test_db = TestDbBuilder::new()
            .member("learner", None)
            .build()
            .await
            .expect("Failed to build test database");
        let user_id = test_db.user_id("learner").unwrap();

        let mut conn = test_db.pool.acquire().await.unwrap();
        let entry = award_points(&mut conn, user_id, None, 10, "Bonus")
            .await
            .unwrap();

        let update = sqlx::query("UPDATE point_transactions SET points = 100 WHERE id = ?")
            .bind(entry.id)
            .execute(&test_db.pool)
            .await;
        assert!(update.is_err(), "ledger rows must not be updated");

        let delete = sqlx::query("DELETE FROM point_transactions WHERE id = ?")
            .bind(entry.id)
            .execute(&test_db.pool)
            .await;
        assert!(delete.is_err(), "ledger rows must not be deleted");

        assert_eq!(
            reconcile_user(&test_db.pool, user_id).await.unwrap().ledger_total,
            10
        );
    }

    #[rocket::async_test]
    async fn detects_tampered_totals() {
        let test_db = TestDbBuilder::new()
            .member("honest", None)
            .member("tampered", None)
            .build()
            .await
            .expect("Failed to build test database");
        let tampered = test_db.user_id("tampered").unwrap();

        sqlx::query("UPDATE users SET points = 999 WHERE id = ?")
            .bind(tampered)
            .execute(&test_db.pool)
            .await
            .unwrap();

        let discrepancies = find_discrepancies(&test_db.pool).await.unwrap();
        assert_eq!(discrepancies.len(), 1);
        assert_eq!(discrepancies[0].user_id, tampered);
        assert_eq!(discrepancies[0].stored_total, 999);
        assert_eq!(discrepancies[0].ledger_total, 0);
    }
}
