use std::sync::Arc;

use uuid::Uuid;

use crate::assignment::AssignmentEngine;
use crate::checkout::CheckoutOrchestrator;
use crate::settlement::{CheckoutUrls, PaymentSettlement};
use crate::state_machine::OrderStateMachine;
use resole_catalog::{GenderTag, ServiceOffering};
use resole_core::{AccountRepository, OrderRepository, PartnerDirectory};
use resole_shared::{
    Account, DeliveryOption, GeoPoint, Order, OrderAmounts, OrderItem, PartnerStatus,
    PlatformSettings, Requester, Role,
};
use resole_store::gateways::{MockPaymentProcessor, RecordingNotifier, StaticGeocoder};
use resole_store::{
    InMemoryAccountRepository, InMemoryOrderRepository, InMemoryServiceCatalog,
    InMemorySettingsRepository,
};

pub const DELIVERY_ADDRESS: &str = "Seefeldstrasse 10, Zurich";
pub const DELIVERY_POINT: GeoPoint = GeoPoint { lat: 2.01, lon: 3.01 };
pub const UNKNOWN_ADDRESS: &str = "Nowhere Lane 404";

pub struct Harness {
    pub orders: Arc<InMemoryOrderRepository>,
    pub accounts: Arc<InMemoryAccountRepository>,
    pub settings: Arc<InMemorySettingsRepository>,
    pub catalog: Arc<InMemoryServiceCatalog>,
    pub geocoder: Arc<StaticGeocoder>,
    pub processor: Arc<MockPaymentProcessor>,
    pub notifier: Arc<RecordingNotifier>,
    pub assignment: Arc<AssignmentEngine>,
}

impl Harness {
    pub fn new() -> Self {
        let orders = Arc::new(InMemoryOrderRepository::new());
        let accounts = Arc::new(InMemoryAccountRepository::new());
        let geocoder = Arc::new(StaticGeocoder::new().with(DELIVERY_ADDRESS, DELIVERY_POINT));
        let notifier = Arc::new(RecordingNotifier::new());
        let assignment = Arc::new(AssignmentEngine::new(
            orders.clone(),
            accounts.clone(),
            geocoder.clone(),
            notifier.clone(),
        ));

        Self {
            orders,
            accounts,
            settings: Arc::new(InMemorySettingsRepository::new(PlatformSettings::default())),
            catalog: Arc::new(InMemoryServiceCatalog::default()),
            geocoder,
            processor: Arc::new(MockPaymentProcessor::new()),
            notifier,
            assignment,
        }
    }

    pub fn state_machine(&self) -> OrderStateMachine {
        OrderStateMachine::new(self.orders.clone(), self.assignment.clone())
    }

    pub fn checkout(&self) -> CheckoutOrchestrator {
        CheckoutOrchestrator::new(
            self.catalog.clone(),
            self.orders.clone(),
            self.accounts.clone(),
            self.settings.clone(),
            self.assignment.clone(),
            self.notifier.clone(),
        )
    }

    pub fn settlement(&self) -> PaymentSettlement {
        PaymentSettlement::new(
            self.orders.clone(),
            self.accounts.clone(),
            self.processor.clone(),
            self.notifier.clone(),
            CheckoutUrls {
                success_url: "https://app.test/ok?order={order_id}".into(),
                cancel_url: "https://app.test/cancel?ref={reference}".into(),
            },
        )
    }

    pub async fn partner(
        &self,
        email: &str,
        point: Option<GeoPoint>,
        status: PartnerStatus,
    ) -> Account {
        let partner = Account::new(Role::Partner, email.into(), email.into());
        self.accounts.create(&partner).await.unwrap();
        if let Some(point) = point {
            self.accounts.update_location(partner.id, "Workshop", point).await.unwrap();
        }
        self.accounts.set_status(partner.id, status).await.unwrap()
    }

    pub async fn client(&self, email: &str) -> Account {
        let client = Account::new(Role::Client, email.into(), "Client".into());
        self.accounts.create(&client).await.unwrap();
        client
    }

    pub async fn offering(&self, price: i64) -> ServiceOffering {
        let offering = ServiceOffering {
            id: Uuid::new_v4(),
            name: format!("Service {}", price),
            price,
            estimated_duration_hours: 48,
            category: "soles".into(),
            gender: GenderTag::Unisex,
            is_active: true,
        };
        self.catalog.upsert(offering.clone()).await;
        offering
    }

    /// Persist a priced order directly, skipping checkout.
    pub async fn pending_order(&self, requester: Uuid, address: &str) -> Order {
        let order = Order::new(
            crate::reference::mint(),
            Requester::Account { account_id: requester },
            vec![OrderItem {
                offering_id: Uuid::new_v4(),
                name: "Resole".into(),
                unit_price: 4000,
                quantity: 1,
            }],
            DeliveryOption::Standard,
            address.into(),
            OrderAmounts {
                service_subtotal: 4000,
                delivery_price: 500,
                commission: 600,
                total_amount: 4500,
            },
            PlatformSettings::default().snapshot(),
        );
        self.orders.insert(&order).await.unwrap();
        order
    }

    pub async fn reload(&self, id: Uuid) -> Order {
        self.orders.get(id).await.unwrap().unwrap()
    }
}
