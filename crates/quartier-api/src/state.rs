use std::sync::Arc;

use quartier_db::Database;
use quartier_gateway::{Dispatcher, GatewayContext};

use crate::error::{ApiError, ApiResult};
use crate::files::Uploads;
use crate::iris::IrisService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub uploads: Uploads,
    pub iris: IrisService,
    /// Accounts registered with this email become admins
    pub admin_email: Option<String>,
}

impl AppStateInner {
    /// Run blocking DB work off the async runtime.
    pub async fn run<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
            .map_err(ApiError::Internal)
    }

    pub fn gateway_context(&self) -> GatewayContext {
        GatewayContext {
            dispatcher: self.dispatcher.clone(),
            db: self.db.clone(),
            jwt_secret: self.jwt_secret.clone(),
        }
    }
}
