use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request};
use std::str::FromStr;
use std::task::{Context, Poll};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Shopkeeper,
    DeliveryPartner,
    Admin,
}

impl FromStr for Role {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "shopkeeper" => Ok(Role::Shopkeeper),
            "delivery_partner" => Ok(Role::DeliveryPartner),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

/// The authenticated user a request acts for, as vouched for by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i32,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: i32, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// The actor is `user_id` or an admin.
    pub fn is_self_or_admin(&self, user_id: i32) -> bool {
        self.user_id == user_id || self.is_admin()
    }

    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let user_id = headers.get(USER_ID_HEADER)?.to_str().ok()?.trim().parse().ok()?;
        let role = headers.get(USER_ROLE_HEADER)?.to_str().ok()?.trim().parse().ok()?;
        Some(Self { user_id, role })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = framework::Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Actor>()
            .copied()
            .ok_or(framework::Error::Unauthenticated)
    }
}

/// Reads the gateway identity headers and puts the [`Actor`] into the request extensions.
/// Requests without them pass through; handlers that need an actor reject them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActorLayer;

impl<S> tower::Layer<S> for ActorLayer {
    type Service = ActorMiddleware<S>;
    fn layer(&self, inner: S) -> Self::Service {
        ActorMiddleware { inner }
    }
}

#[derive(Debug, Clone)]
pub struct ActorMiddleware<S> {
    inner: S,
}

impl<S, ReqBody> tower::Service<Request<ReqBody>> for ActorMiddleware<S>
where
    S: tower::Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        if let Some(actor) = Actor::from_headers(req.headers()) {
            req.extensions_mut().insert(actor);
        }
        self.inner.call(req)
    }
}

/// Operations only some roles may run.
pub trait RoleGated {
    const ALLOWED_ROLES: &'static [Role];

    fn actor(&self) -> Actor;

    fn check_permission(role: Role) -> bool {
        Self::ALLOWED_ROLES.contains(&role)
    }

    /// The acting user, if its role may run this operation.
    fn authorize(&self) -> Result<Actor, framework::Error> {
        let actor = self.actor();
        if Self::check_permission(actor.role) {
            Ok(actor)
        } else {
            tracing::warn!(
                user_id = actor.user_id,
                role = ?actor.role,
                operation = std::any::type_name::<Self>(),
                "Role not allowed"
            );
            Err(framework::Error::PermissionsDenied)
        }
    }
}

#[macro_export]
/// Declare which roles may run an operation that carries an `actor: Actor` field.
///
/// # Example
/// ```ignore
/// role_gate! {ConfirmOrder | [Role::Shopkeeper, Role::Admin]}
/// ```
macro_rules! role_gate {
    ($oper:ty | $roles:expr) => {
        impl $crate::utils::actor::RoleGated for $oper {
            const ALLOWED_ROLES: &'static [$crate::utils::actor::Role] = &$roles;
            fn actor(&self) -> $crate::utils::actor::Actor {
                self.actor
            }
        }
    };
}
