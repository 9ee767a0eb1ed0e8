use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::map_db_error;
use resole_core::{AccountRepository, PartnerDirectory, StoreError};
use resole_shared::{Account, GeoPoint, PartnerProfile, PartnerStatus};

const ACCOUNT_COLUMNS: &str = "id, role, email, name, phone, address, lat, lon, partner_status, \
    payout_account, password_hash, created_at";

/// Accounts table; also serves as the partner directory.
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn update_partner(&self, partner_id: Uuid, set_clause: &str, value: &str) -> Result<Account, StoreError> {
        let sql = format!(
            "UPDATE accounts SET {} = $2 WHERE id = $1 AND role = 'partner' RETURNING {}",
            set_clause, ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(partner_id)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| StoreError::NotFound(format!("partner {}", partner_id)))?
            .try_into()
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    role: String,
    email: String,
    name: String,
    phone: Option<String>,
    address: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    partner_status: Option<String>,
    payout_account: Option<String>,
    password_hash: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let invalid = |e: resole_shared::ParseEnumError| StoreError::Invalid(e.to_string());
        let partner = row
            .partner_status
            .map(|s| {
                s.parse::<PartnerStatus>().map(|status| PartnerProfile {
                    status,
                    payout_account: row.payout_account.clone(),
                })
            })
            .transpose()
            .map_err(invalid)?;

        Ok(Account {
            id: row.id,
            role: row.role.parse().map_err(invalid)?,
            email: row.email,
            name: row.name,
            phone: row.phone,
            address: row.address,
            location: match (row.lat, row.lon) {
                (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
                _ => None,
            },
            partner,
            password_hash: row.password_hash,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn create(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, role, email, name, phone, address, lat, lon, partner_status,
                payout_account, password_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(account.id)
        .bind(account.role.as_str())
        .bind(&account.email)
        .bind(&account.name)
        .bind(&account.phone)
        .bind(&account.address)
        .bind(account.location.map(|p| p.lat))
        .bind(account.location.map(|p| p.lon))
        .bind(account.partner_status().map(|s| s.as_str()))
        .bind(account.payout_account())
        .bind(&account.password_hash)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .map(Account::try_from)
            .transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE LOWER(email) = LOWER($1)", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .map(Account::try_from)
            .transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("account {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl PartnerDirectory for PgAccountRepository {
    async fn eligible_partners(&self) -> Result<Vec<Account>, StoreError> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE role = 'partner' AND partner_status = 'approved' \
             AND lat BETWEEN -90 AND 90 AND lon BETWEEN -180 AND 180",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    async fn get_partner(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1 AND role = 'partner'", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .map(Account::try_from)
            .transpose()
    }

    async fn update_location(
        &self,
        partner_id: Uuid,
        address: &str,
        point: GeoPoint,
    ) -> Result<Account, StoreError> {
        if !point.is_valid() {
            return Err(StoreError::Invalid(format!("coordinates out of range: {:?}", point)));
        }
        let sql = format!(
            "UPDATE accounts SET address = $2, lat = $3, lon = $4 WHERE id = $1 AND role = 'partner' RETURNING {}",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(partner_id)
            .bind(address)
            .bind(point.lat)
            .bind(point.lon)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| StoreError::NotFound(format!("partner {}", partner_id)))?
            .try_into()
    }

    async fn set_status(&self, partner_id: Uuid, status: PartnerStatus) -> Result<Account, StoreError> {
        self.update_partner(partner_id, "partner_status", status.as_str()).await
    }

    async fn set_payout_account(
        &self,
        partner_id: Uuid,
        payout_account: &str,
    ) -> Result<Account, StoreError> {
        self.update_partner(partner_id, "payout_account", payout_account).await
    }
}
