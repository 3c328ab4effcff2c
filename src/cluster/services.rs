use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use super::token::TokenService;

/// Cluster role of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterRole {
    #[default]
    NotStarted,
    Client,
    Server,
}

impl ClusterRole {
    fn to_u8(self) -> u8 {
        match self {
            ClusterRole::NotStarted => 0,
            ClusterRole::Client => 1,
            ClusterRole::Server => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ClusterRole::Client,
            2 => ClusterRole::Server,
            _ => ClusterRole::NotStarted,
        }
    }
}

/// Process-wide cluster role and the token services backing each role.
#[derive(Default)]
pub struct ClusterTokenServices {
    role: AtomicU8,
    client: RwLock<Option<Arc<dyn TokenService>>>,
    server: RwLock<Option<Arc<dyn TokenService>>>,
}

impl ClusterTokenServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_role(&self, role: ClusterRole) {
        let previous = ClusterRole::from_u8(self.role.swap(role.to_u8(), Ordering::AcqRel));
        if previous != role {
            tracing::info!(from = ?previous, to = ?role, "cluster role changed");
        }
    }

    pub fn role(&self) -> ClusterRole {
        ClusterRole::from_u8(self.role.load(Ordering::Acquire))
    }

    pub fn is_client(&self) -> bool {
        self.role() == ClusterRole::Client
    }

    pub fn is_server(&self) -> bool {
        self.role() == ClusterRole::Server
    }

    /// Token service used while this process is a cluster client.
    pub fn set_client(&self, service: Arc<dyn TokenService>) {
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = Some(service);
    }

    /// Token service used while this process is an embedded token server.
    pub fn set_embedded_server(&self, service: Arc<dyn TokenService>) {
        *self.server.write().unwrap_or_else(|e| e.into_inner()) = Some(service);
    }

    /// The service matching the current role, if that role has one.
    pub fn pick(&self) -> Option<Arc<dyn TokenService>> {
        let slot = match self.role() {
            ClusterRole::Client => &self.client,
            ClusterRole::Server => &self.server,
            ClusterRole::NotStarted => return None,
        };
        slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl std::fmt::Debug for ClusterTokenServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterTokenServices")
            .field("role", &self.role())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{TokenResult, TokenResultStatus};

    struct Fixed(TokenResultStatus);

    impl TokenService for Fixed {
        fn request_token(&self, _: u64, _: u32, _: bool) -> crate::Result<TokenResult> {
            Ok(TokenResult::new(self.0))
        }
    }

    #[test]
    fn test_pick_follows_role() {
        let services = ClusterTokenServices::new();
        services.set_client(Arc::new(Fixed(TokenResultStatus::Ok)));
        services.set_embedded_server(Arc::new(Fixed(TokenResultStatus::Blocked)));
        assert!(services.pick().is_none());

        services.set_role(ClusterRole::Client);
        assert!(services.is_client());
        let status = services.pick().unwrap().request_token(1, 1, false).unwrap().status;
        assert_eq!(status, TokenResultStatus::Ok);

        services.set_role(ClusterRole::Server);
        assert!(services.is_server());
        let status = services.pick().unwrap().request_token(1, 1, false).unwrap().status;
        assert_eq!(status, TokenResultStatus::Blocked);
    }

    #[test]
    fn test_role_without_service() {
        let services = ClusterTokenServices::new();
        services.set_role(ClusterRole::Client);
        assert!(services.pick().is_none());
    }
}
