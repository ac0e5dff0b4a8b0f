use super::memory::MemoryDatabase;
use kanau::processor::Processor;
use framework::sqlx::DatabaseProcessor;
use time::PrimitiveDateTime;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i32,
    pub user_id: i32,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub order_id: Option<i32>,
    #[serde(skip)]
    pub dedupe_key: Option<String>,
    pub created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "marketplace.notification_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Order,
    Delivery,
    Promotion,
    System,
    Account,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Order => "order",
            NotificationKind::Delivery => "delivery",
            NotificationKind::Promotion => "promotion",
            NotificationKind::System => "system",
            NotificationKind::Account => "account",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushToken {
    pub id: i32,
    pub user_id: i32,
    pub token: String,
    pub platform: PushPlatform,
    pub is_active: bool,
    pub created_at: PrimitiveDateTime,
    pub last_used: PrimitiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "marketplace.push_platform", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PushPlatform {
    Web,
    Android,
    Ios,
}

/// Insert a notification unless one with the same dedupe key exists.
/// Returns `None` for the duplicate.
#[derive(Debug, Clone)]
pub struct CreateNotification {
    pub user_id: i32,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub order_id: Option<i32>,
    pub dedupe_key: Option<String>,
    pub now: PrimitiveDateTime,
}

impl Processor<CreateNotification> for DatabaseProcessor {
    type Output = Option<Notification>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:CreateNotification", err)]
    async fn process(&self, input: CreateNotification) -> Result<Option<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO marketplace.notifications
                (user_id, type, title, message, is_read, order_id, dedupe_key, created_at)
            VALUES ($1, $2, $3, $4, FALSE, $5, $6, $7)
            ON CONFLICT (dedupe_key) DO NOTHING
            RETURNING id, user_id, type, title, message, is_read, order_id, dedupe_key, created_at
            "#,
        )
        .bind(input.user_id)
        .bind(input.kind)
        .bind(&input.title)
        .bind(&input.message)
        .bind(input.order_id)
        .bind(&input.dedupe_key)
        .bind(input.now)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<CreateNotification> for MemoryDatabase {
    type Output = Option<Notification>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: CreateNotification,
    ) -> Result<Option<Notification>, framework::Error> {
        let mut tables = self.tables();
        if input.dedupe_key.is_some()
            && tables
                .notifications
                .values()
                .any(|n| n.dedupe_key == input.dedupe_key)
        {
            return Ok(None);
        }
        let notification = Notification {
            id: tables.next_serial("notifications"),
            user_id: input.user_id,
            kind: input.kind,
            title: input.title,
            message: input.message,
            is_read: false,
            order_id: input.order_id,
            dedupe_key: input.dedupe_key,
            created_at: input.now,
        };
        tables
            .notifications
            .insert(notification.id, notification.clone());
        Ok(Some(notification))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FindNotificationById {
    pub id: i32,
}

impl Processor<FindNotificationById> for DatabaseProcessor {
    type Output = Option<Notification>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:FindNotificationById", err)]
    async fn process(&self, input: FindNotificationById) -> Result<Option<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, user_id, type, title, message, is_read, order_id, dedupe_key, created_at
            FROM marketplace.notifications
            WHERE id = $1
            "#,
        )
        .bind(input.id)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<FindNotificationById> for MemoryDatabase {
    type Output = Option<Notification>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: FindNotificationById,
    ) -> Result<Option<Notification>, framework::Error> {
        Ok(self.tables().notifications.get(&input.id).cloned())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListUserNotifications {
    pub user_id: i32,
}

impl Processor<ListUserNotifications> for DatabaseProcessor {
    type Output = Vec<Notification>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListUserNotifications", err)]
    async fn process(&self, input: ListUserNotifications) -> Result<Vec<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, user_id, type, title, message, is_read, order_id, dedupe_key, created_at
            FROM marketplace.notifications
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(input.user_id)
        .fetch_all(self.db())
        .await
    }
}

impl Processor<ListUserNotifications> for MemoryDatabase {
    type Output = Vec<Notification>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ListUserNotifications,
    ) -> Result<Vec<Notification>, framework::Error> {
        let tables = self.tables();
        let mut notifications: Vec<Notification> = tables
            .notifications
            .values()
            .filter(|n| n.user_id == input.user_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(notifications)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CountUnreadNotifications {
    pub user_id: i32,
}

impl Processor<CountUnreadNotifications> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:CountUnreadNotifications", err)]
    async fn process(&self, input: CountUnreadNotifications) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM marketplace.notifications WHERE user_id = $1 AND NOT is_read",
        )
        .bind(input.user_id)
        .fetch_one(self.db())
        .await
    }
}

impl Processor<CountUnreadNotifications> for MemoryDatabase {
    type Output = i64;
    type Error = framework::Error;
    async fn process(&self, input: CountUnreadNotifications) -> Result<i64, framework::Error> {
        let tables = self.tables();
        let unread = tables
            .notifications
            .values()
            .filter(|n| n.user_id == input.user_id && !n.is_read)
            .count();
        Ok(unread as i64)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MarkNotificationRead {
    pub id: i32,
}

impl Processor<MarkNotificationRead> for DatabaseProcessor {
    type Output = Option<Notification>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:MarkNotificationRead", err)]
    async fn process(&self, input: MarkNotificationRead) -> Result<Option<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>(
            r#"
            UPDATE marketplace.notifications SET is_read = TRUE
            WHERE id = $1
            RETURNING id, user_id, type, title, message, is_read, order_id, dedupe_key, created_at
            "#,
        )
        .bind(input.id)
        .fetch_optional(self.db())
        .await
    }
}

impl Processor<MarkNotificationRead> for MemoryDatabase {
    type Output = Option<Notification>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: MarkNotificationRead,
    ) -> Result<Option<Notification>, framework::Error> {
        let mut tables = self.tables();
        Ok(tables.notifications.get_mut(&input.id).map(|n| {
            n.is_read = true;
            n.clone()
        }))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MarkAllNotificationsRead {
    pub user_id: i32,
}

impl Processor<MarkAllNotificationsRead> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:MarkAllNotificationsRead", err)]
    async fn process(&self, input: MarkAllNotificationsRead) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE marketplace.notifications SET is_read = TRUE WHERE user_id = $1 AND NOT is_read",
        )
        .bind(input.user_id)
        .execute(self.db())
        .await?;
        Ok(result.rows_affected())
    }
}

impl Processor<MarkAllNotificationsRead> for MemoryDatabase {
    type Output = u64;
    type Error = framework::Error;
    async fn process(&self, input: MarkAllNotificationsRead) -> Result<u64, framework::Error> {
        let mut tables = self.tables();
        let mut marked = 0;
        for notification in tables
            .notifications
            .values_mut()
            .filter(|n| n.user_id == input.user_id && !n.is_read)
        {
            notification.is_read = true;
            marked += 1;
        }
        Ok(marked)
    }
}

/// Register a device token, moving it to `user_id` if another account had it.
#[derive(Debug, Clone)]
pub struct RegisterPushToken {
    pub user_id: i32,
    pub token: String,
    pub platform: PushPlatform,
    pub now: PrimitiveDateTime,
}

impl Processor<RegisterPushToken> for DatabaseProcessor {
    type Output = PushToken;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:RegisterPushToken", err)]
    async fn process(&self, input: RegisterPushToken) -> Result<PushToken, sqlx::Error> {
        sqlx::query_as::<_, PushToken>(
            r#"
            INSERT INTO marketplace.push_tokens (user_id, token, platform, is_active, created_at, last_used)
            VALUES ($1, $2, $3, TRUE, $4, $4)
            ON CONFLICT (token) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                platform = EXCLUDED.platform,
                is_active = TRUE,
                last_used = EXCLUDED.last_used
            RETURNING id, user_id, token, platform, is_active, created_at, last_used
            "#,
        )
        .bind(input.user_id)
        .bind(&input.token)
        .bind(input.platform)
        .bind(input.now)
        .fetch_one(self.db())
        .await
    }
}

impl Processor<RegisterPushToken> for MemoryDatabase {
    type Output = PushToken;
    type Error = framework::Error;
    async fn process(&self, input: RegisterPushToken) -> Result<PushToken, framework::Error> {
        let mut tables = self.tables();
        if let Some(existing) = tables
            .push_tokens
            .values_mut()
            .find(|t| t.token == input.token)
        {
            existing.user_id = input.user_id;
            existing.platform = input.platform;
            existing.is_active = true;
            existing.last_used = input.now;
            return Ok(existing.clone());
        }
        let token = PushToken {
            id: tables.next_serial("push_tokens"),
            user_id: input.user_id,
            token: input.token,
            platform: input.platform,
            is_active: true,
            created_at: input.now,
            last_used: input.now,
        };
        tables.push_tokens.insert(token.id, token.clone());
        Ok(token)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListActivePushTokens {
    pub user_id: i32,
}

impl Processor<ListActivePushTokens> for DatabaseProcessor {
    type Output = Vec<PushToken>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListActivePushTokens", err)]
    async fn process(&self, input: ListActivePushTokens) -> Result<Vec<PushToken>, sqlx::Error> {
        sqlx::query_as::<_, PushToken>(
            r#"
            SELECT id, user_id, token, platform, is_active, created_at, last_used
            FROM marketplace.push_tokens
            WHERE user_id = $1 AND is_active
            "#,
        )
        .bind(input.user_id)
        .fetch_all(self.db())
        .await
    }
}

impl Processor<ListActivePushTokens> for MemoryDatabase {
    type Output = Vec<PushToken>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ListActivePushTokens,
    ) -> Result<Vec<PushToken>, framework::Error> {
        Ok(self
            .tables()
            .push_tokens
            .values()
            .filter(|t| t.user_id == input.user_id && t.is_active)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct DeactivatePushToken {
    pub token: String,
}

impl Processor<DeactivatePushToken> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:DeactivatePushToken", err)]
    async fn process(&self, input: DeactivatePushToken) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE marketplace.push_tokens SET is_active = FALSE WHERE token = $1")
            .bind(&input.token)
            .execute(self.db())
            .await?;
        Ok(())
    }
}

impl Processor<DeactivatePushToken> for MemoryDatabase {
    type Output = ();
    type Error = framework::Error;
    async fn process(&self, input: DeactivatePushToken) -> Result<(), framework::Error> {
        if let Some(token) = self
            .tables()
            .push_tokens
            .values_mut()
            .find(|t| t.token == input.token)
        {
            token.is_active = false;
        }
        Ok(())
    }
}
