// Dashboard statistics for the admin overview

use crate::error::ReviewResult;
use crate::ledger::{self, PaymentCounts};
use crate::registry::{self, PendingCounts};
use crate::users::{self, UserCounts};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewStats {
    pub pending: PendingCounts,
    pub payments: PaymentCounts,
    pub users: UserCounts,
}

impl ReviewStats {
    /// Items waiting on a reviewer: pending submissions, pending payments
    /// and verified payments nobody has linked yet
    pub fn backlog(&self) -> i64 {
        self.pending.total() + self.payments.pending + self.payments.unlinked
    }
}

pub fn collect_stats(conn: &Connection) -> ReviewResult<ReviewStats> {
    Ok(ReviewStats {
        pending: registry::count_pending(conn)?,
        payments: ledger::count_payments(conn)?,
        users: users::count_users(conn)?,
    })
}
