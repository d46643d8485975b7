use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use lessonbook_core::{
    AccountSnapshot, AccountStore, CascadeSession, CommissionRule, CommissionType,
    CustomerPackage, Direction, InstructorEarning, LedgerEntry, LedgerStore, PackageUsageAudit,
    ServicePackage,
};
use lessonbook_finance::normalize_raw_entries;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Acquire, PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::warn;
use uuid::Uuid;

/// Postgres-backed ledger. Every cascade runs in one transaction.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn CascadeSession>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("opening cascade transaction")?;
        Ok(Box::new(PgCascadeSession { tx }))
    }
}

/// Package lookups and the usage audit run inside savepoints so that a failed
/// statement leaves the outer transaction usable.
pub struct PgCascadeSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CascadeSession for PgCascadeSession {
    async fn lock_booking(&mut self, booking_id: Uuid) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(booking_id.to_string())
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("locking booking {booking_id}"))?;
        Ok(())
    }

    async fn booking_commission(&mut self, booking_id: Uuid) -> Result<Option<CommissionRule>> {
        let row = sqlx::query(
            "SELECT commission_type, commission_value FROM booking_commissions WHERE booking_id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(commission_from_row).transpose()
    }

    async fn instructor_service_commission(
        &mut self,
        instructor_id: Uuid,
        service_id: Uuid,
    ) -> Result<Option<CommissionRule>> {
        let row = sqlx::query(
            r#"
            SELECT commission_type, commission_value
            FROM instructor_service_commissions
            WHERE instructor_id = $1 AND service_id = $2
            "#,
        )
        .bind(instructor_id)
        .bind(service_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(commission_from_row).transpose()
    }

    async fn instructor_default_commission(
        &mut self,
        instructor_id: Uuid,
    ) -> Result<Option<CommissionRule>> {
        let row = sqlx::query(
            "SELECT commission_type, commission_value FROM instructor_default_commissions WHERE instructor_id = $1",
        )
        .bind(instructor_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(commission_from_row).transpose()
    }

    async fn customer_package(&mut self, package_id: Uuid) -> Result<Option<CustomerPackage>> {
        let mut savepoint = Acquire::begin(&mut self.tx).await?;
        let result = fetch_customer_package(&mut savepoint, package_id).await;
        settle(savepoint, result).await
    }

    async fn service_package(&mut self, package_id: Uuid) -> Result<Option<ServicePackage>> {
        let mut savepoint = Acquire::begin(&mut self.tx).await?;
        let result = fetch_service_package(&mut savepoint, package_id).await;
        settle(savepoint, result).await
    }

    async fn earning_for_update(&mut self, booking_id: Uuid) -> Result<Option<InstructorEarning>> {
        let row = sqlx::query(
            r#"
            SELECT id, booking_id, instructor_id, commission_rate, total_earnings,
                   lesson_amount, lesson_duration, lesson_date, currency, created_at, updated_at
            FROM instructor_earnings
            WHERE booking_id = $1
            FOR UPDATE
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(earning_from_row).transpose()
    }

    async fn insert_earning(&mut self, earning: &InstructorEarning) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO instructor_earnings (
                id, booking_id, instructor_id, commission_rate, total_earnings,
                lesson_amount, lesson_duration, lesson_date, currency, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (booking_id) DO NOTHING
            "#,
        )
        .bind(earning.id)
        .bind(earning.booking_id)
        .bind(earning.instructor_id)
        .bind(earning.commission_rate)
        .bind(earning.total_earnings)
        .bind(earning.lesson_amount)
        .bind(earning.lesson_duration)
        .bind(earning.lesson_date)
        .bind(&earning.currency)
        .bind(earning.created_at)
        .bind(earning.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_earning(&mut self, earning: &InstructorEarning) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE instructor_earnings
            SET instructor_id = $2,
                commission_rate = $3,
                total_earnings = $4,
                lesson_amount = $5,
                lesson_duration = $6,
                lesson_date = $7,
                currency = $8,
                updated_at = $9
            WHERE booking_id = $1
            "#,
        )
        .bind(earning.booking_id)
        .bind(earning.instructor_id)
        .bind(earning.commission_rate)
        .bind(earning.total_earnings)
        .bind(earning.lesson_amount)
        .bind(earning.lesson_duration)
        .bind(earning.lesson_date)
        .bind(&earning.currency)
        .bind(earning.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            bail!("no earnings row for booking {}", earning.booking_id);
        }
        Ok(())
    }

    async fn adjust_customer_balance(
        &mut self,
        customer_id: Uuid,
        delta: Decimal,
        currency: &str,
    ) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            INSERT INTO customer_balances (customer_id, balance, currency, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (customer_id)
            DO UPDATE SET
                balance = customer_balances.balance + EXCLUDED.balance,
                updated_at = EXCLUDED.updated_at
            RETURNING balance
            "#,
        )
        .bind(customer_id)
        .bind(delta)
        .bind(currency)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.try_get("balance")?)
    }

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallet_transactions (
                id, customer_id, amount, direction, transaction_type, currency, status,
                description, booking_id, rental_id, transaction_date, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.id)
        .bind(entry.customer_id)
        .bind(entry.amount)
        .bind(entry.direction.map(Direction::as_str))
        .bind(&entry.transaction_type)
        .bind(&entry.currency)
        .bind(&entry.status)
        .bind(&entry.description)
        .bind(entry.booking_id)
        .bind(entry.rental_id)
        .bind(entry.transaction_date)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_package_usage(&mut self, audit: &PackageUsageAudit) -> Result<()> {
        let mut savepoint = Acquire::begin(&mut self.tx).await?;
        let result = insert_package_usage(&mut savepoint, audit).await;
        settle(savepoint, result).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PgCascadeSession { tx } = *self;
        tx.commit().await.context("committing cascade transaction")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let PgCascadeSession { tx } = *self;
        tx.rollback()
            .await
            .context("rolling back cascade transaction")
    }
}

#[async_trait]
impl AccountStore for PgLedgerStore {
    async fn ledger_entries(&self, customer_id: Uuid) -> Result<Vec<LedgerEntry>> {
        // Amounts travel as text: NUMERIC admits 'NaN', which Decimal cannot decode.
        let rows = sqlx::query(
            r#"
            SELECT json_build_object(
                'id', id,
                'amount', amount::text,
                'direction', direction,
                'transaction_type', transaction_type,
                'currency', currency,
                'status', status,
                'description', description,
                'booking_id', booking_id,
                'rental_id', rental_id,
                'transaction_date', transaction_date,
                'created_at', created_at
            ) AS entry
            FROM wallet_transactions
            WHERE customer_id = $1
            ORDER BY COALESCE(transaction_date, created_at) NULLS LAST, id
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        let raw = rows
            .iter()
            .map(|row| row.try_get::<Value, _>("entry"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(normalize_raw_entries(&raw, customer_id))
    }

    async fn account_snapshot(&self, customer_id: Uuid) -> Result<Option<AccountSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT customer_id, balance, total_spent, last_payment_at, updated_at
            FROM student_accounts
            WHERE customer_id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(AccountSnapshot {
            customer_id: row.try_get("customer_id")?,
            balance: row.try_get("balance")?,
            total_spent: row.try_get("total_spent")?,
            last_payment_at: row.try_get("last_payment_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn latest_succeeded_payment_at(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"
            SELECT MAX(created_at) AS last_payment_at
            FROM payment_intents
            WHERE customer_id = $1 AND status = 'succeeded'
            "#,
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("last_payment_at")?)
    }

    async fn upsert_account_snapshot(&self, snapshot: &AccountSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO student_accounts (customer_id, balance, total_spent, last_payment_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (customer_id)
            DO UPDATE SET
                balance = EXCLUDED.balance,
                total_spent = EXCLUDED.total_spent,
                last_payment_at = EXCLUDED.last_payment_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(snapshot.customer_id)
        .bind(snapshot.balance)
        .bind(snapshot.total_spent)
        .bind(snapshot.last_payment_at)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn customer_ids(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT customer_id FROM wallet_transactions
            UNION
            SELECT customer_id FROM student_accounts
            ORDER BY customer_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Uuid> { Ok(row.try_get("customer_id")?) })
            .collect()
    }
}

async fn settle<T>(savepoint: Transaction<'_, Postgres>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            savepoint.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = savepoint.rollback().await {
                warn!("savepoint rollback failed: {rollback_err}");
            }
            Err(err)
        }
    }
}

async fn fetch_customer_package(
    conn: &mut PgConnection,
    package_id: Uuid,
) -> Result<Option<CustomerPackage>> {
    let row = sqlx::query(
        r#"
        SELECT id, customer_id, service_package_id, package_name, purchase_price,
               total_hours, used_hours, remaining_hours
        FROM customer_packages
        WHERE id = $1
        "#,
    )
    .bind(package_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(CustomerPackage {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        service_package_id: row.try_get("service_package_id")?,
        package_name: row.try_get("package_name")?,
        purchase_price: row.try_get("purchase_price")?,
        total_hours: row.try_get("total_hours")?,
        used_hours: row.try_get("used_hours")?,
        remaining_hours: row.try_get("remaining_hours")?,
    }))
}

async fn fetch_service_package(
    conn: &mut PgConnection,
    package_id: Uuid,
) -> Result<Option<ServicePackage>> {
    let row = sqlx::query(
        "SELECT id, name, total_hours, sessions_count, duration_hours FROM service_packages WHERE id = $1",
    )
    .bind(package_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(ServicePackage {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        total_hours: row.try_get("total_hours")?,
        sessions_count: row.try_get("sessions_count")?,
        duration_hours: row.try_get("duration_hours")?,
    }))
}

async fn insert_package_usage(conn: &mut PgConnection, audit: &PackageUsageAudit) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO package_usage_audit (
            id, booking_id, customer_package_id, old_amount, new_amount, package_name, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(audit.id)
    .bind(audit.booking_id)
    .bind(audit.customer_package_id)
    .bind(audit.old_amount)
    .bind(audit.new_amount)
    .bind(&audit.package_name)
    .bind(audit.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn commission_from_row(row: &PgRow) -> Result<CommissionRule> {
    let commission_type: String = row.try_get("commission_type")?;
    let commission_value: Decimal = row.try_get("commission_value")?;
    Ok(CommissionRule::new(
        CommissionType::parse(&commission_type),
        commission_value,
    ))
}

fn earning_from_row(row: &PgRow) -> Result<InstructorEarning> {
    let lesson_date: NaiveDate = row.try_get("lesson_date")?;
    Ok(InstructorEarning {
        id: row.try_get("id")?,
        booking_id: row.try_get("booking_id")?,
        instructor_id: row.try_get("instructor_id")?,
        commission_rate: row.try_get("commission_rate")?,
        total_earnings: row.try_get("total_earnings")?,
        lesson_amount: row.try_get("lesson_amount")?,
        lesson_duration: row.try_get("lesson_duration")?,
        lesson_date,
        currency: row.try_get("currency")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
