use crate::entities::Database;
use crate::entities::notification::{
    CountUnreadNotifications, CreateNotification, DeactivatePushToken, FindNotificationById,
    ListActivePushTokens, ListUserNotifications, MarkAllNotificationsRead, MarkNotificationRead,
    Notification, PushPlatform, PushToken, RegisterPushToken,
};
use crate::events::{DomainEvent, Notice};
use crate::services::push::{PushGateway, PushMessage, PushOutcome};
use crate::utils::actor::Actor;
use framework::now_time;
use kanau::processor::Processor;
use std::convert::Infallible;
use tracing::{instrument, warn};

#[derive(Debug, Clone)]
pub struct NotificationService {
    pub db: Database,
    pub push: PushGateway,
}

/// Fan an event out to its recipients. Failures are logged and never reach the
/// caller, whose state change has already been committed.
impl Processor<DomainEvent> for NotificationService {
    type Output = Vec<Notification>;
    type Error = Infallible;
    #[instrument(skip_all, fields(event = input.name()))]
    async fn process(&self, input: DomainEvent) -> Result<Vec<Notification>, Infallible> {
        let mut created = Vec::new();
        for notice in input.notices() {
            match self.store_notice(notice).await {
                Ok(Some(notification)) => {
                    self.push_to_devices(&notification).await;
                    created.push(notification);
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to write notification: {e}"),
            }
        }
        Ok(created)
    }
}

impl NotificationService {
    async fn store_notice(&self, notice: Notice) -> Result<Option<Notification>, framework::Error> {
        self.db
            .process(CreateNotification {
                user_id: notice.user_id,
                kind: notice.kind,
                title: notice.title,
                message: notice.message,
                order_id: notice.order_id,
                dedupe_key: Some(notice.dedupe_key),
                now: now_time(),
            })
            .await
    }

    /// One detached send per device; a token FCM no longer knows is switched off.
    async fn push_to_devices(&self, notification: &Notification) {
        if !self.push.is_enabled() {
            return;
        }
        let tokens = match self
            .db
            .process(ListActivePushTokens {
                user_id: notification.user_id,
            })
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Failed to load push tokens: {e}");
                return;
            }
        };
        for token in tokens {
            let message = PushMessage {
                token: token.token,
                title: notification.title.clone(),
                body: notification.message.clone(),
                order_id: notification.order_id,
            };
            let push = self.push.clone();
            let db = self.db.clone();
            tokio::spawn(async move {
                let token = message.token.clone();
                match push.process(message).await {
                    Ok(PushOutcome::Sent) => {}
                    Ok(PushOutcome::Unregistered) => {
                        if let Err(e) = db.process(DeactivatePushToken { token }).await {
                            warn!("Failed to deactivate push token: {e}");
                        }
                    }
                    Err(e) => warn!("Push delivery failed: {e}"),
                }
            });
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListNotifications {
    pub actor: Actor,
    pub user_id: i32,
}

impl Processor<ListNotifications> for NotificationService {
    type Output = Vec<Notification>;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: ListNotifications) -> Result<Vec<Notification>, framework::Error> {
        ensure_self_or_admin(input.actor, input.user_id)?;
        self.db
            .process(ListUserNotifications {
                user_id: input.user_id,
            })
            .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UnreadCount {
    pub actor: Actor,
    pub user_id: i32,
}

impl Processor<UnreadCount> for NotificationService {
    type Output = i64;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: UnreadCount) -> Result<i64, framework::Error> {
        ensure_self_or_admin(input.actor, input.user_id)?;
        self.db
            .process(CountUnreadNotifications {
                user_id: input.user_id,
            })
            .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MarkRead {
    pub actor: Actor,
    pub notification_id: i32,
}

impl Processor<MarkRead> for NotificationService {
    type Output = Notification;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: MarkRead) -> Result<Notification, framework::Error> {
        let notification = self
            .db
            .process(FindNotificationById {
                id: input.notification_id,
            })
            .await?
            .ok_or(framework::Error::NotFound)?;
        ensure_self_or_admin(input.actor, notification.user_id)?;
        self.db
            .process(MarkNotificationRead {
                id: notification.id,
            })
            .await?
            .ok_or(framework::Error::NotFound)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MarkAllRead {
    pub actor: Actor,
    pub user_id: i32,
}

impl Processor<MarkAllRead> for NotificationService {
    type Output = u64;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: MarkAllRead) -> Result<u64, framework::Error> {
        ensure_self_or_admin(input.actor, input.user_id)?;
        self.db
            .process(MarkAllNotificationsRead {
                user_id: input.user_id,
            })
            .await
    }
}

#[derive(Debug, Clone)]
pub struct RegisterDevice {
    pub actor: Actor,
    pub token: String,
    pub platform: PushPlatform,
}

impl Processor<RegisterDevice> for NotificationService {
    type Output = PushToken;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: RegisterDevice) -> Result<PushToken, framework::Error> {
        self.db
            .process(RegisterPushToken {
                user_id: input.actor.user_id,
                token: input.token,
                platform: input.platform,
                now: now_time(),
            })
            .await
    }
}

fn ensure_self_or_admin(actor: Actor, user_id: i32) -> Result<(), framework::Error> {
    if actor.is_self_or_admin(user_id) {
        Ok(())
    } else {
        warn!(
            user_id = actor.user_id,
            target = user_id,
            "Notification access to another user denied"
        );
        Err(framework::Error::PermissionsDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::memory::MemoryDatabase;
    use crate::entities::notification::NotificationKind;
    use crate::events::delivery::DeliveryStatusChangedEvent;
    use crate::entities::delivery::DeliveryStatus;
    use crate::utils::actor::Role;

    fn service() -> NotificationService {
        NotificationService {
            db: MemoryDatabase::new().into(),
            push: PushGateway::Disabled,
        }
    }

    fn delivered() -> DomainEvent {
        DomainEvent::DeliveryStatusChanged(DeliveryStatusChangedEvent {
            delivery_id: 7,
            order_id: 100,
            customer_id: 11,
            shopkeeper_id: 22,
            new_status: DeliveryStatus::Delivered,
            changed_at: now_time(),
        })
    }

    #[tokio::test]
    async fn replayed_event_does_not_duplicate() {
        let service = service();
        let Ok(first) = service.process(delivered()).await;
        let Ok(second) = service.process(delivered()).await;
        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert!(first.iter().all(|n| n.kind == NotificationKind::Delivery));
    }

    #[tokio::test]
    async fn read_side_is_scoped_to_the_owner() {
        let service = service();
        let Ok(_) = service.process(delivered()).await;
        let customer = Actor::new(11, Role::Customer);

        let unread = service
            .process(UnreadCount {
                actor: customer,
                user_id: 11,
            })
            .await
            .unwrap();
        assert_eq!(unread, 1);

        let foreign = service
            .process(ListNotifications {
                actor: customer,
                user_id: 22,
            })
            .await;
        assert!(matches!(foreign, Err(framework::Error::PermissionsDenied)));

        let marked = service
            .process(MarkAllRead {
                actor: customer,
                user_id: 11,
            })
            .await
            .unwrap();
        assert_eq!(marked, 1);

        let admin = Actor::new(1, Role::Admin);
        let shopkeeper_inbox = service
            .process(ListNotifications {
                actor: admin,
                user_id: 22,
            })
            .await
            .unwrap();
        let denied = service
            .process(MarkRead {
                actor: customer,
                notification_id: shopkeeper_inbox[0].id,
            })
            .await;
        assert!(matches!(denied, Err(framework::Error::PermissionsDenied)));
    }
}
