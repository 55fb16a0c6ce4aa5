/// Case manager: case lifecycle, bids, declines and assignment
use crate::{
    cases::{CaseOutcome, NewBid, NewCase},
    chat::{ConversationStore, MessageStore},
    db::models::{Bid, BidStatus, Case, CaseDecline, CaseStatus, UserRole},
    error::{ChatError, ChatResult},
    gateway::{ConnectionRegistry, ServerEvent},
    notifications::NotificationFanout,
};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

const CASE_COLUMNS: &str = "id, customer_id, provider_id, title, description, status, bidding_enabled, \
     current_bidders, max_bidders, winning_bid_id, created_at, updated_at";

/// Case manager service
#[derive(Clone)]
pub struct CaseManager {
    db: SqlitePool,
    default_max_bidders: i64,
    registry: Arc<ConnectionRegistry>,
    fanout: NotificationFanout,
}

impl CaseManager {
    pub fn new(
        db: SqlitePool,
        default_max_bidders: i64,
        registry: Arc<ConnectionRegistry>,
        fanout: NotificationFanout,
    ) -> Self {
        Self {
            db,
            default_max_bidders,
            registry,
            fanout,
        }
    }

    async fn role_of(&self, user_id: &str) -> ChatResult<UserRole> {
        sqlx::query_scalar("SELECT role FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ChatError::NotFound("Account not found".to_string()))
    }

    async fn require_role(&self, user_id: &str, role: UserRole) -> ChatResult<()> {
        if self.role_of(user_id).await? != role {
            return Err(ChatError::Forbidden(format!(
                "Only {}s can do this",
                role.as_str()
            )));
        }
        Ok(())
    }

    /// Get case by id
    pub async fn get(&self, case_id: &str) -> ChatResult<Case> {
        let mut conn = self.db.acquire().await?;
        Self::get_in(&mut conn, case_id).await
    }

    async fn get_in(conn: &mut SqliteConnection, case_id: &str) -> ChatResult<Case> {
        sqlx::query_as(&format!("SELECT {CASE_COLUMNS} FROM cases WHERE id = ?1"))
            .bind(case_id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| ChatError::NotFound("Case not found".to_string()))
    }

    /// Customers see their own cases; providers see any case
    pub async fn get_visible(&self, case_id: &str, user_id: &str, role: UserRole) -> ChatResult<Case> {
        let case = self.get(case_id).await?;
        if role == UserRole::Customer && case.customer_id != user_id {
            return Err(ChatError::Forbidden("Not your case".to_string()));
        }
        Ok(case)
    }

    /// Create a case. With `provider_id` set the case is assigned at once
    /// and its conversation opened; otherwise it waits for bids.
    pub async fn create_case(&self, customer_id: &str, request: NewCase) -> ChatResult<CaseOutcome> {
        self.require_role(customer_id, UserRole::Customer).await?;

        let title = request.title.trim();
        if title.is_empty() {
            return Err(ChatError::Validation("Title cannot be empty".to_string()));
        }
        let max_bidders = request.max_bidders.unwrap_or(self.default_max_bidders);
        if max_bidders < 1 {
            return Err(ChatError::Validation("maxBidders must be at least 1".to_string()));
        }
        if let Some(provider_id) = &request.provider_id {
            self.require_role(provider_id, UserRole::Provider).await?;
        }

        let now = Utc::now();
        let direct = request.provider_id.is_some();
        let case = Case {
            id: Uuid::new_v4().to_string(),
            customer_id: customer_id.to_string(),
            provider_id: request.provider_id,
            title: title.to_string(),
            description: request.description,
            status: if direct {
                CaseStatus::Assigned
            } else {
                CaseStatus::Open
            },
            bidding_enabled: request.bidding_enabled && !direct,
            current_bidders: 0,
            max_bidders,
            winning_bid_id: None,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO cases (id, customer_id, provider_id, title, description, status, bidding_enabled,
                                current_bidders, max_bidders, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?9)",
        )
        .bind(&case.id)
        .bind(&case.customer_id)
        .bind(&case.provider_id)
        .bind(&case.title)
        .bind(&case.description)
        .bind(case.status)
        .bind(case.bidding_enabled)
        .bind(case.max_bidders)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let opened = match &case.provider_id {
            Some(provider_id) => Some(Self::open_case_conversation(&mut tx, &case, provider_id).await?),
            None => None,
        };

        tx.commit().await?;

        tracing::info!(case_id = %case.id, customer_id, direct, max_bidders, "Created case");

        let conversation_id = match opened {
            Some((conversation_id, announcement)) => {
                self.announce_assignment(&case, &conversation_id, announcement).await;
                Some(conversation_id)
            }
            None => None,
        };

        Ok(CaseOutcome {
            case,
            conversation_id,
        })
    }

    /// Place a bid. The bidder counter moves first, guarded by the cap, and
    /// the bid row is inserted in the same transaction.
    pub async fn place_bid(&self, case_id: &str, provider_id: &str, bid: NewBid) -> ChatResult<Bid> {
        self.require_role(provider_id, UserRole::Provider).await?;
        if matches!(bid.price, Some(price) if price < 0) {
            return Err(ChatError::Validation("Price cannot be negative".to_string()));
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let claimed = sqlx::query(
            "UPDATE cases
             SET current_bidders = current_bidders + 1,
                 status = CASE WHEN status = 'open' THEN 'bidding' ELSE status END,
                 updated_at = ?3
             WHERE id = ?1
               AND bidding_enabled = 1
               AND status IN ('open', 'bidding')
               AND current_bidders < max_bidders
               AND NOT EXISTS (SELECT 1 FROM bids WHERE case_id = ?1 AND provider_id = ?2)",
        )
        .bind(case_id)
        .bind(provider_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.diagnose_rejected_bid(case_id, provider_id).await);
        }

        let bid = Bid {
            id: Uuid::new_v4().to_string(),
            case_id: case_id.to_string(),
            provider_id: provider_id.to_string(),
            price: bid.price,
            comment: bid.comment,
            status: BidStatus::Pending,
            created_at: now,
        };

        let inserted = sqlx::query(
            "INSERT INTO bids (id, case_id, provider_id, price, comment, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&bid.id)
        .bind(&bid.case_id)
        .bind(&bid.provider_id)
        .bind(bid.price)
        .bind(&bid.comment)
        .bind(bid.status)
        .bind(bid.created_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // Dropping the transaction rolls back the counter increment
            Err(e) if ChatError::is_unique_violation(&e) => {
                return Err(ChatError::DuplicateBid("Already bid on this case".to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;

        tracing::info!(case_id, provider_id, bid_id = %bid.id, "Bid placed");
        Ok(bid)
    }

    async fn diagnose_rejected_bid(&self, case_id: &str, provider_id: &str) -> ChatError {
        let case = match self.get(case_id).await {
            Ok(case) => case,
            Err(e) => return e,
        };

        let existing: Result<Option<i64>, sqlx::Error> =
            sqlx::query_scalar("SELECT 1 FROM bids WHERE case_id = ?1 AND provider_id = ?2")
                .bind(case_id)
                .bind(provider_id)
                .fetch_optional(&self.db)
                .await;
        match existing {
            Ok(Some(_)) => ChatError::DuplicateBid("Already bid on this case".to_string()),
            Ok(None) => {
                tracing::debug!(
                    case_id,
                    status = ?case.status,
                    current_bidders = case.current_bidders,
                    max_bidders = case.max_bidders,
                    "Bid rejected"
                );
                ChatError::BiddingClosed("Case is not accepting bids".to_string())
            }
            Err(e) => e.into(),
        }
    }

    /// Record that a provider is not interested. The case itself is untouched.
    pub async fn decline_case(
        &self,
        case_id: &str,
        provider_id: &str,
        reason: Option<String>,
    ) -> ChatResult<CaseDecline> {
        self.require_role(provider_id, UserRole::Provider).await?;
        self.get(case_id).await?;

        let decline = CaseDecline {
            case_id: case_id.to_string(),
            provider_id: provider_id.to_string(),
            reason,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO case_declines (case_id, provider_id, reason, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (case_id, provider_id) DO NOTHING",
        )
        .bind(&decline.case_id)
        .bind(&decline.provider_id)
        .bind(&decline.reason)
        .bind(decline.created_at)
        .execute(&self.db)
        .await?;

        tracing::debug!(case_id, provider_id, "Case declined");
        Ok(decline)
    }

    /// Cases a provider can still bid on
    pub async fn list_available(&self, provider_id: &str) -> ChatResult<Vec<Case>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {CASE_COLUMNS} FROM cases c
             WHERE c.status IN ('open', 'bidding')
               AND c.bidding_enabled = 1
               AND c.current_bidders < c.max_bidders
               AND NOT EXISTS (SELECT 1 FROM case_declines d WHERE d.case_id = c.id AND d.provider_id = ?1)
               AND NOT EXISTS (SELECT 1 FROM bids b WHERE b.case_id = c.id AND b.provider_id = ?1)
             ORDER BY c.created_at DESC"
        ))
        .bind(provider_id)
        .fetch_all(&self.db)
        .await?)
    }

    /// Bids on a case, visible to its customer only
    pub async fn list_bids(&self, case_id: &str, customer_id: &str) -> ChatResult<Vec<Bid>> {
        let case = self.get(case_id).await?;
        if case.customer_id != customer_id {
            return Err(ChatError::Forbidden("Not your case".to_string()));
        }

        Ok(sqlx::query_as(
            "SELECT id, case_id, provider_id, price, comment, status, created_at
             FROM bids WHERE case_id = ?1 ORDER BY created_at ASC",
        )
        .bind(case_id)
        .fetch_all(&self.db)
        .await?)
    }

    /// Accept one bid: the case is assigned to its provider, the other bids
    /// are rejected and the case conversation is opened.
    pub async fn accept_bid(&self, case_id: &str, customer_id: &str, bid_id: &str) -> ChatResult<CaseOutcome> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let assigned = sqlx::query(
            "UPDATE cases
             SET status = 'assigned',
                 winning_bid_id = ?3,
                 provider_id = (SELECT provider_id FROM bids WHERE id = ?3),
                 bidding_enabled = 0,
                 updated_at = ?4
             WHERE id = ?1 AND customer_id = ?2 AND status IN ('open', 'bidding')
               AND EXISTS (SELECT 1 FROM bids WHERE id = ?3 AND case_id = ?1 AND status = 'pending')",
        )
        .bind(case_id)
        .bind(customer_id)
        .bind(bid_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if assigned.rows_affected() == 0 {
            tx.rollback().await?;
            let case = self.get(case_id).await?;
            if case.customer_id != customer_id {
                return Err(ChatError::Forbidden("Not your case".to_string()));
            }
            let bid_exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM bids WHERE id = ?1 AND case_id = ?2")
                    .bind(bid_id)
                    .bind(case_id)
                    .fetch_optional(&self.db)
                    .await?;
            if bid_exists.is_none() {
                return Err(ChatError::NotFound("Bid not found".to_string()));
            }
            return Err(ChatError::Conflict(
                "Case is no longer accepting bids".to_string(),
            ));
        }

        sqlx::query(
            "UPDATE bids SET status = CASE WHEN id = ?1 THEN 'accepted' ELSE 'rejected' END
             WHERE case_id = ?2",
        )
        .bind(bid_id)
        .bind(case_id)
        .execute(&mut *tx)
        .await?;

        let case = Self::get_in(&mut tx, case_id).await?;
        let provider_id = case
            .provider_id
            .clone()
            .ok_or_else(|| ChatError::Internal("Assigned case has no provider".to_string()))?;
        let (conversation_id, announcement) =
            Self::open_case_conversation(&mut tx, &case, &provider_id).await?;

        tx.commit().await?;

        tracing::info!(case_id, bid_id, provider_id = %provider_id, "Bid accepted");
        self.announce_assignment(&case, &conversation_id, announcement).await;

        Ok(CaseOutcome {
            case,
            conversation_id: Some(conversation_id),
        })
    }

    /// Mark an assigned case completed and close its conversations
    pub async fn complete_case(&self, case_id: &str, user_id: &str) -> ChatResult<Case> {
        let case = self.get(case_id).await?;
        if case.customer_id != user_id && case.provider_id.as_deref() != Some(user_id) {
            return Err(ChatError::Forbidden("Not a participant of this case".to_string()));
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let completed = sqlx::query(
            "UPDATE cases SET status = 'completed', updated_at = ?2 WHERE id = ?1 AND status = 'assigned'",
        )
        .bind(case_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if completed.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(ChatError::Conflict("Only assigned cases can be completed".to_string()));
        }

        let closed = ConversationStore::close_for_case_in(&mut tx, case_id).await?;
        tx.commit().await?;

        tracing::info!(case_id, closed_conversations = closed, "Case completed");

        Ok(Case {
            status: CaseStatus::Completed,
            updated_at: now,
            ..case
        })
    }

    /// Open the case conversation and post the assignment notice in it
    async fn open_case_conversation(
        conn: &mut SqliteConnection,
        case: &Case,
        provider_id: &str,
    ) -> ChatResult<(String, ServerEvent)> {
        let (conversation, _) = ConversationStore::create_or_resume_in(
            &mut *conn,
            &case.customer_id,
            provider_id,
            Some(case.id.as_str()),
        )
        .await?;

        let notice = MessageStore::append_system_in(
            &mut *conn,
            &conversation.id,
            &format!("Case assigned: {}", case.title),
        )
        .await?;

        let announcement = ServerEvent::NewMessage {
            conversation_id: conversation.id.clone(),
            message: notice.message,
        };
        Ok((conversation.id, announcement))
    }

    async fn announce_assignment(&self, case: &Case, conversation_id: &str, announcement: ServerEvent) {
        self.registry
            .emit_to_room(conversation_id, &announcement, None)
            .await;
        if let Err(e) = self.fanout.case_assigned(case, conversation_id).await {
            tracing::warn!(case_id = %case.id, "Case assignment notification failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{insert_user, test_pool};
    use crate::notifications::NotificationStore;

    struct Harness {
        manager: CaseManager,
        notifications: NotificationStore,
        pool: SqlitePool,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let (pool, dir) = test_pool().await;
        insert_user(&pool, "customer", "customer").await;
        for provider in ["p1", "p2", "p3", "p4", "p5"] {
            insert_user(&pool, provider, "provider").await;
        }
        let registry = Arc::new(ConnectionRegistry::default());
        let notifications = NotificationStore::new(pool.clone());
        let fanout = NotificationFanout::new(registry.clone(), notifications.clone());
        Harness {
            manager: CaseManager::new(pool.clone(), 3, registry, fanout),
            notifications,
            pool,
            _dir: dir,
        }
    }

    fn new_case(title: &str) -> NewCase {
        NewCase {
            title: title.to_string(),
            description: String::new(),
            bidding_enabled: true,
            max_bidders: None,
            provider_id: None,
        }
    }

    #[tokio::test]
    async fn test_bid_cap_scenario() {
        let h = harness().await;
        let case = h
            .manager
            .create_case("customer", new_case("Смяна на бойлер"))
            .await
            .unwrap()
            .case;
        assert_eq!(case.max_bidders, 3);

        let mut handles = Vec::new();
        for provider in ["p1", "p2", "p3"] {
            let manager = h.manager.clone();
            let case_id = case.id.clone();
            handles.push(tokio::spawn(async move {
                manager.place_bid(&case_id, provider, NewBid::default()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let case = h.manager.get(&case.id).await.unwrap();
        assert_eq!(case.current_bidders, 3);
        assert_eq!(case.status, CaseStatus::Bidding);

        let err = h
            .manager
            .place_bid(&case.id, "p4", NewBid::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::BiddingClosed(_)));
    }

    #[tokio::test]
    async fn test_concurrent_bids_never_exceed_cap() {
        let h = harness().await;
        let mut request = new_case("Ремонт на покрив");
        request.max_bidders = Some(2);
        let case = h.manager.create_case("customer", request).await.unwrap().case;

        let mut handles = Vec::new();
        for provider in ["p1", "p2", "p3", "p4", "p5"] {
            let manager = h.manager.clone();
            let case_id = case.id.clone();
            handles.push(tokio::spawn(async move {
                manager.place_bid(&case_id, provider, NewBid::default()).await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(ChatError::BiddingClosed(_)) => {}
                Err(e) => panic!("unexpected error {:?}", e),
            }
        }
        assert_eq!(accepted, 2);

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bids WHERE case_id = ?1")
            .bind(&case.id)
            .fetch_one(&h.pool)
            .await
            .unwrap();
        assert_eq!(stored, 2);
        assert_eq!(h.manager.get(&case.id).await.unwrap().current_bidders, 2);
    }

    #[tokio::test]
    async fn test_duplicate_bid_and_decline() {
        let h = harness().await;
        let case = h.manager.create_case("customer", new_case("Боядисване")).await.unwrap().case;

        h.manager.place_bid(&case.id, "p1", NewBid::default()).await.unwrap();
        assert!(matches!(
            h.manager.place_bid(&case.id, "p1", NewBid::default()).await.unwrap_err(),
            ChatError::DuplicateBid(_)
        ));
        assert_eq!(h.manager.get(&case.id).await.unwrap().current_bidders, 1);

        h.manager.decline_case(&case.id, "p2", Some("Too far".into())).await.unwrap();
        h.manager.decline_case(&case.id, "p2", None).await.unwrap();

        assert!(h.manager.list_available("p1").await.unwrap().is_empty());
        assert!(h.manager.list_available("p2").await.unwrap().is_empty());
        assert_eq!(h.manager.list_available("p3").await.unwrap().len(), 1);

        // Declining does not stop the provider from changing their mind
        h.manager.place_bid(&case.id, "p2", NewBid::default()).await.unwrap();

        assert!(matches!(
            h.manager.place_bid("missing", "p3", NewBid::default()).await.unwrap_err(),
            ChatError::NotFound(_)
        ));
        assert!(matches!(
            h.manager.place_bid(&case.id, "customer", NewBid::default()).await.unwrap_err(),
            ChatError::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn test_accept_bid_assigns_and_opens_conversation() {
        let h = harness().await;
        let case = h.manager.create_case("customer", new_case("ВиК")).await.unwrap().case;
        let winning = h
            .manager
            .place_bid(&case.id, "p1", NewBid { price: Some(80), comment: None })
            .await
            .unwrap();
        h.manager.place_bid(&case.id, "p2", NewBid::default()).await.unwrap();

        assert!(matches!(
            h.manager.accept_bid(&case.id, "p2", &winning.id).await.unwrap_err(),
            ChatError::Forbidden(_)
        ));

        let outcome = h.manager.accept_bid(&case.id, "customer", &winning.id).await.unwrap();
        assert_eq!(outcome.case.status, CaseStatus::Assigned);
        assert_eq!(outcome.case.provider_id.as_deref(), Some("p1"));
        assert_eq!(outcome.case.winning_bid_id.as_deref(), Some(winning.id.as_str()));
        assert!(outcome.conversation_id.is_some());

        let bids = h.manager.list_bids(&case.id, "customer").await.unwrap();
        let statuses: Vec<_> = bids.iter().map(|b| (b.provider_id.as_str(), b.status)).collect();
        assert!(statuses.contains(&("p1", BidStatus::Accepted)));
        assert!(statuses.contains(&("p2", BidStatus::Rejected)));

        // Provider was offline: stored notification only
        let rows = h.notifications.list("p1", true, 10, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "case_assigned");

        // Second accept is a conflict
        assert!(matches!(
            h.manager.accept_bid(&case.id, "customer", &winning.id).await.unwrap_err(),
            ChatError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_complete_closes_case_conversations() {
        let h = harness().await;
        let mut request = new_case("Ел. инсталация");
        request.provider_id = Some("p3".to_string());
        let outcome = h.manager.create_case("customer", request).await.unwrap();
        assert_eq!(outcome.case.status, CaseStatus::Assigned);
        let conversation_id = outcome.conversation_id.unwrap();

        assert!(matches!(
            h.manager.place_bid(&outcome.case.id, "p1", NewBid::default()).await.unwrap_err(),
            ChatError::BiddingClosed(_)
        ));
        assert!(h.manager.complete_case(&outcome.case.id, "p1").await.is_err());

        let completed = h.manager.complete_case(&outcome.case.id, "p3").await.unwrap();
        assert_eq!(completed.status, CaseStatus::Completed);

        let conversation = ConversationStore::new(h.pool.clone())
            .get(&conversation_id)
            .await
            .unwrap();
        assert_eq!(conversation.status, crate::db::models::ConversationStatus::Closed);
        assert_eq!(conversation.last_message.as_deref(), Some("Case assigned: Ел. инсталация"));
    }
}
