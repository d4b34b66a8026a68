use tokio::sync::OnceCell;
use url::Url;

use crate::scrape::{FetchError, FetchPolicy, Session};

/// A [`Session`] opened on first use and shared by the rest of one operation.
///
/// Operations served entirely from cache never touch the network, not even
/// for the warm-up request.
pub(crate) struct SessionSlot {
    root: Url,
    policy: FetchPolicy,
    cell: OnceCell<Session>,
}

impl SessionSlot {
    pub fn new(root: Url, policy: FetchPolicy) -> Self {
        Self {
            root,
            policy,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<&Session, FetchError> {
        self.cell
            .get_or_try_init(|| Session::start(self.root.clone(), self.policy.clone()))
            .await
    }

    pub fn is_open(&self) -> bool {
        self.cell.initialized()
    }
}
