pub mod delivery;
pub mod delivery_partner;
pub mod delivery_tracking;
pub mod memory;
pub mod notification;
pub mod order;
pub mod store;

use delivery::*;
use delivery_partner::*;
use delivery_tracking::*;
use kanau::processor::Processor;
use framework::sqlx::DatabaseProcessor;
use memory::MemoryDatabase;
use notification::*;
use order::*;
use store::*;

/// The storage backend selected at startup.
#[derive(Debug, Clone)]
pub enum Database {
    Postgres(DatabaseProcessor),
    Memory(MemoryDatabase),
}

impl From<DatabaseProcessor> for Database {
    fn from(value: DatabaseProcessor) -> Self {
        Database::Postgres(value)
    }
}

impl From<MemoryDatabase> for Database {
    fn from(value: MemoryDatabase) -> Self {
        Database::Memory(value)
    }
}

macro_rules! dispatch_queries {
    ($($query:ty),* $(,)?) => {
        $(
            impl Processor<$query> for Database {
                type Output = <MemoryDatabase as Processor<$query>>::Output;
                type Error = framework::Error;
                async fn process(&self, input: $query) -> Result<Self::Output, framework::Error> {
                    match self {
                        Database::Postgres(db) => db.process(input).await.map_err(Into::into),
                        Database::Memory(db) => db.process(input).await,
                    }
                }
            }
        )*
    };
}

dispatch_queries! {
    CreateStore,
    FindStoreById,

    CreateOrder,
    FindOrderById,
    ListOrdersByCustomer,
    ListOrdersByStore,
    ListOrderItems,
    TransitionOrderStatus,
    CancelOrder,

    CreatePendingDelivery,
    FindDeliveryById,
    FindDeliveryByOrderId,
    ListPartnerDeliveries,
    ListUnassignedDeliveries,
    ListExpiredAssignments,
    BindDeliveryPartner,
    ReassignDeliveryPartner,
    AcceptDeliveryAssignment,
    ReleaseDeliveryAssignment,
    TransitionDeliveryStatus,
    UpdateDeliveryLocation,
    RateDelivery,

    RecordDeliveryStatus,
    ListDeliveryStatusHistory,
    RecordLocationSample,
    ListLocationTrail,

    RegisterDeliveryPartner,
    FindPartnerById,
    FindPartnerByUserId,
    ListDeliveryPartners,
    ReviewPartnerApplication,
    ListAssignableCandidates,
    SetPartnerAvailability,
    UpdatePartnerLocation,
    RecordCompletedDelivery,
    RefreshPartnerRating,

    CreateNotification,
    FindNotificationById,
    ListUserNotifications,
    CountUnreadNotifications,
    MarkNotificationRead,
    MarkAllNotificationsRead,
    RegisterPushToken,
    ListActivePushTokens,
    DeactivatePushToken,
}
