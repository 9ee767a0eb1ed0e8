use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::database::map_db_error;
use resole_core::{OrderFilter, OrderRepository, StoreError, WriteOutcome};
use resole_shared::{
    GeoPoint, Order, OrderItem, OrderStatus, PaymentStatus, PricingSnapshot, Requester,
    Settlement, StatusChange,
};

const ORDER_COLUMNS: &str = "id, reference_number, requester, cobbler_id, items, delivery_option, \
    delivery_address, delivery_lat, delivery_lon, address_unresolvable_at, delivery_price, service_subtotal, commission, \
    total_amount, currency, pricing, status, payment_status, payment_session_id, settlement, notes, \
    history, created_at, updated_at";

/// PostgreSQL order store. Every conditional write is a single
/// `UPDATE ... WHERE <precondition> RETURNING`.
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {} FROM orders WHERE {} = $1", ORDER_COLUMNS, clause);
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .map(Order::try_from)
            .transpose()
    }

    /// `Applied` when the update returned a row, otherwise `Stale` with the
    /// current row (or `NotFound`).
    async fn outcome(&self, id: Uuid, updated: Option<OrderRow>) -> Result<WriteOutcome, StoreError> {
        match updated {
            Some(row) => Ok(WriteOutcome::Applied(row.try_into()?)),
            None => self
                .get(id)
                .await?
                .map(WriteOutcome::Stale)
                .ok_or_else(|| StoreError::NotFound(format!("order {}", id))),
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    reference_number: String,
    requester: Json<Requester>,
    cobbler_id: Option<Uuid>,
    items: Json<Vec<OrderItem>>,
    delivery_option: String,
    delivery_address: String,
    delivery_lat: Option<f64>,
    delivery_lon: Option<f64>,
    address_unresolvable_at: Option<DateTime<Utc>>,
    delivery_price: i64,
    service_subtotal: i64,
    commission: i64,
    total_amount: i64,
    currency: String,
    pricing: Json<PricingSnapshot>,
    status: String,
    payment_status: String,
    payment_session_id: Option<String>,
    settlement: Option<Json<Settlement>>,
    notes: Option<String>,
    history: Json<Vec<StatusChange>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let invalid = |e: resole_shared::ParseEnumError| StoreError::Invalid(e.to_string());
        let delivery_location = match (row.delivery_lat, row.delivery_lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        };

        Ok(Order {
            id: row.id,
            reference_number: row.reference_number,
            requester: row.requester.0,
            cobbler_id: row.cobbler_id,
            items: row.items.0,
            delivery_option: row.delivery_option.parse().map_err(invalid)?,
            delivery_address: row.delivery_address,
            delivery_location,
            address_unresolvable_at: row.address_unresolvable_at,
            delivery_price: row.delivery_price,
            service_subtotal: row.service_subtotal,
            commission: row.commission,
            total_amount: row.total_amount,
            currency: row.currency,
            pricing: row.pricing.0,
            status: row.status.parse().map_err(invalid)?,
            payment_status: row.payment_status.parse().map_err(invalid)?,
            payment_session_id: row.payment_session_id,
            settlement: row.settlement.map(|s| s.0),
            notes: row.notes,
            history: row.history.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, reference_number, requester, requester_account_id, cobbler_id, items,
                delivery_option, delivery_address, delivery_lat, delivery_lon, address_unresolvable_at,
                delivery_price, service_subtotal, commission, total_amount, currency, pricing, status,
                payment_status, payment_session_id, settlement, notes, history, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                $19, $20, $21, $22, $23, $24, $25)
            "#,
        )
        .bind(order.id)
        .bind(&order.reference_number)
        .bind(Json(&order.requester))
        .bind(order.requester.account_id())
        .bind(order.cobbler_id)
        .bind(Json(&order.items))
        .bind(order.delivery_option.as_str())
        .bind(&order.delivery_address)
        .bind(order.delivery_location.map(|p| p.lat))
        .bind(order.delivery_location.map(|p| p.lon))
        .bind(order.address_unresolvable_at)
        .bind(order.delivery_price)
        .bind(order.service_subtotal)
        .bind(order.commission)
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(Json(&order.pricing))
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.payment_session_id)
        .bind(order.settlement.as_ref().map(Json))
        .bind(&order.notes)
        .bind(Json(&order.history))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_by_reference(&self, reference_number: &str) -> Result<Option<Order>, StoreError> {
        self.fetch_one_where("reference_number", reference_number).await
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, StoreError> {
        let sql = format!(
            "SELECT {} FROM orders WHERE id = \
             (SELECT order_id FROM payment_sessions WHERE session_id = $1)",
            ORDER_COLUMNS
        );
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .map(Order::try_from)
            .transpose()
    }

    async fn list_unassigned(&self) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            "SELECT {} FROM orders WHERE status = 'pending' AND cobbler_id IS NULL ORDER BY created_at",
            ORDER_COLUMNS
        );
        sqlx::query_as::<_, OrderRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM orders WHERE TRUE", ORDER_COLUMNS));

        if let Some(requester) = filter.requester_id {
            query.push(" AND requester_account_id = ").push_bind(requester);
        }
        if let Some(partner) = filter.cobbler_id {
            query.push(" AND cobbler_id = ").push_bind(partner);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        query.push(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        query
            .build_query_as::<OrderRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }

    async fn assign_partner(
        &self,
        id: Uuid,
        partner_id: Uuid,
        change: StatusChange,
    ) -> Result<WriteOutcome, StoreError> {
        let sql = format!(
            "UPDATE orders SET cobbler_id = $2, status = $3, history = history || $4, updated_at = $5 \
             WHERE id = $1 AND status = 'pending' AND cobbler_id IS NULL RETURNING {}",
            ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .bind(partner_id)
            .bind(change.to.as_str())
            .bind(Json(vec![&change]))
            .bind(change.at)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;

        self.outcome(id, row).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        change: StatusChange,
    ) -> Result<WriteOutcome, StoreError> {
        let sql = format!(
            "UPDATE orders SET status = $3, history = history || $4, updated_at = $5 \
             WHERE id = $1 AND status = $2 RETURNING {}",
            ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .bind(expected.as_str())
            .bind(change.to.as_str())
            .bind(Json(vec![&change]))
            .bind(change.at)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;

        self.outcome(id, row).await
    }

    async fn attach_payment_session(
        &self,
        id: Uuid,
        session_id: &str,
    ) -> Result<WriteOutcome, StoreError> {
        // The session row is written in the same statement as the order.
        let sql = format!(
            "WITH updated AS ( \
                 UPDATE orders SET payment_session_id = $2, payment_status = 'pending', updated_at = NOW() \
                 WHERE id = $1 AND payment_status <> 'paid' AND status <> 'cancelled' RETURNING {cols} \
             ), recorded AS ( \
                 INSERT INTO payment_sessions (session_id, order_id) \
                 SELECT $2, id FROM updated ON CONFLICT (session_id) DO NOTHING \
             ) \
             SELECT {cols} FROM updated",
            cols = ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;

        self.outcome(id, row).await
    }

    async fn settle_payment(
        &self,
        id: Uuid,
        settlement: Settlement,
    ) -> Result<WriteOutcome, StoreError> {
        let sql = format!(
            "UPDATE orders SET payment_status = 'paid', commission = $2, settlement = $3, updated_at = NOW() \
             WHERE id = $1 AND payment_status = 'pending' AND status <> 'cancelled' RETURNING {}",
            ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .bind(settlement.commission)
            .bind(Json(&settlement))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;

        self.outcome(id, row).await
    }

    async fn set_payment_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<WriteOutcome, StoreError> {
        let sql = format!(
            "UPDATE orders SET payment_status = $3, updated_at = NOW() \
             WHERE id = $1 AND payment_status = $2 RETURNING {}",
            ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .bind(expected.as_str())
            .bind(next.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;

        self.outcome(id, row).await
    }

    async fn set_delivery_location(&self, id: Uuid, point: GeoPoint) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE orders SET delivery_lat = $2, delivery_lon = $3, address_unresolvable_at = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(point.lat)
        .bind(point.lon)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {}", id)));
        }
        Ok(())
    }

    async fn mark_address_unresolvable(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET address_unresolvable_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {}", id)));
        }
        Ok(())
    }
}
