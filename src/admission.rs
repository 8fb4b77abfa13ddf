//! Capacity-bounded admission.
//!
//! A join either takes a free seat through the store's conditional insert
//! or lands on the waitlist. There is no read-then-write on the seat count
//! anywhere in this path; the store evaluates the capacity predicate and
//! inserts in one statement.
//!
//! Among simultaneous requesters the first insert SQLite serializes wins.
//! The rest reach the waitlist in the order their fallback runs, which may
//! differ from arrival order. Leaving never promotes from the waitlist, and
//! `admit` keeps a waitlisted identity waitlisted; it has to leave the
//! waitlist before a retry can take a seat.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::{bad, not_found, AppErr, AppResult};
use crate::models::MemberStatus;
use crate::store::RoomStore;
use crate::utils::jwt::{Credential, CredentialIssuer};

#[derive(Debug, Clone)]
pub enum AdmitOutcome {
    Admitted(Credential),
    /// 1-based position in the waitlist.
    Waitlisted { position: usize },
}

#[derive(Clone)]
pub struct Admission {
    store: RoomStore,
    issuer: Arc<dyn CredentialIssuer>,
}

impl Admission {
    pub fn new(store: RoomStore, issuer: Arc<dyn CredentialIssuer>) -> Self {
        Self { store, issuer }
    }

    /// Seat `identity` in the room or put it on the waitlist.
    ///
    /// Repeating the call is harmless: a participant gets a fresh credential,
    /// a waitlisted identity keeps its single entry.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub async fn admit(&self, room_id: &str, identity: &str) -> AppResult<AdmitOutcome> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(bad("identity is required"));
        }

        if self.store.try_admit(room_id, identity).await? {
            info!(identity = %identity, "admitted");
            return self.admitted(room_id, identity);
        }

        let room = self
            .store
            .room_header(room_id)
            .await?
            .ok_or_else(|| not_found("class not found"))?;
        if !room.active {
            return Err(AppErr::InvalidState("class is not active".into()));
        }

        if self.store.member_status(room_id, identity).await?.is_none()
            && self.store.try_waitlist(room_id, identity).await?
        {
            info!(identity = %identity, "waitlisted");
        }

        // Resolve against what the store now holds; a concurrent request
        // with the same identity may have won either insert.
        match self.store.member_status(room_id, identity).await? {
            Some(MemberStatus::Participant) => self.admitted(room_id, identity),
            Some(MemberStatus::Waitlisted) => {
                let position = self
                    .store
                    .waitlist_position(room_id, identity)
                    .await?
                    .unwrap_or(1);
                Ok(AdmitOutcome::Waitlisted { position })
            }
            // only reachable if the class was stopped in between
            None => Err(AppErr::InvalidState("class is not active".into())),
        }
    }

    /// Remove `identity` from the room, whichever list it is on.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub async fn leave(&self, room_id: &str, identity: &str) -> AppResult<MemberStatus> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(bad("identity is required"));
        }
        if self.store.room_header(room_id).await?.is_none() {
            return Err(not_found("class not found"));
        }
        let removed = self
            .store
            .remove_member(room_id, identity)
            .await?
            .ok_or_else(|| not_found("identity is not in this class"))?;
        info!(identity = %identity, from = removed.as_str(), "left");
        Ok(removed)
    }

    fn admitted(&self, room_id: &str, identity: &str) -> AppResult<AdmitOutcome> {
        self.issuer.issue(room_id, identity).map(AdmitOutcome::Admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::jwt::JwtIssuer;
    use std::collections::HashSet;
    use tempfile::TempDir;

    async fn setup(capacity: u32) -> (TempDir, RoomStore, Admission, String) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("adm.db").display());
        let store = RoomStore::connect(&url, 8).await.unwrap();
        store.migrate().await.unwrap();
        let room = store.create_room("class", capacity).await.unwrap();
        store.set_active(&room.id, true).await.unwrap();
        let admission = Admission::new(store.clone(), Arc::new(JwtIssuer::new("k", 60)));
        (dir, store, admission, room.id)
    }

    #[tokio::test]
    async fn concurrent_admits_never_overshoot() {
        let (_dir, store, admission, room_id) = setup(5).await;

        let mut tasks = Vec::new();
        for i in 0..40 {
            let admission = admission.clone();
            let room_id = room_id.clone();
            tasks.push(tokio::spawn(async move {
                admission.admit(&room_id, &format!("student_{i}")).await
            }));
        }
        let mut admitted = 0;
        let mut waitlisted = 0;
        for t in tasks {
            match t.await.unwrap().unwrap() {
                AdmitOutcome::Admitted(_) => admitted += 1,
                AdmitOutcome::Waitlisted { .. } => waitlisted += 1,
            }
        }
        assert_eq!(admitted, 5);
        assert_eq!(waitlisted, 35);

        let room = store.find_room(&room_id).await.unwrap().unwrap();
        assert_eq!(room.participants.len(), 5);
        assert_eq!(room.waitlist.len(), 35);
        let unique: HashSet<_> = room.participants.iter().chain(&room.waitlist).collect();
        assert_eq!(unique.len(), 40);
    }

    #[tokio::test]
    async fn repeated_admits_are_idempotent() {
        let (_dir, store, admission, room_id) = setup(1).await;

        assert!(matches!(admission.admit(&room_id, "ann").await.unwrap(), AdmitOutcome::Admitted(_)));
        assert!(matches!(admission.admit(&room_id, "ann").await.unwrap(), AdmitOutcome::Admitted(_)));
        assert!(matches!(
            admission.admit(&room_id, "bob").await.unwrap(),
            AdmitOutcome::Waitlisted { position: 1 }
        ));
        assert!(matches!(
            admission.admit(&room_id, " bob ").await.unwrap(),
            AdmitOutcome::Waitlisted { position: 1 }
        ));

        let room = store.find_room(&room_id).await.unwrap().unwrap();
        assert_eq!(room.participants, vec!["ann"]);
        assert_eq!(room.waitlist, vec!["bob"]);
    }

    #[tokio::test]
    async fn inactive_or_missing_room_is_untouched() {
        let (_dir, store, admission, room_id) = setup(2).await;
        store.set_active(&room_id, false).await.unwrap();

        assert!(matches!(admission.admit(&room_id, "ann").await, Err(AppErr::InvalidState(_))));
        assert!(matches!(admission.admit("missing", "ann").await, Err(AppErr::NotFound(_))));
        assert!(matches!(admission.admit(&room_id, "  ").await, Err(AppErr::Bad(_))));

        let room = store.find_room(&room_id).await.unwrap().unwrap();
        assert!(room.participants.is_empty());
        assert!(room.waitlist.is_empty());
    }

    #[tokio::test]
    async fn waitlisted_identity_is_seated_on_retry_after_a_leave() {
        let (_dir, _store, admission, room_id) = setup(1).await;
        admission.admit(&room_id, "ann").await.unwrap();
        admission.admit(&room_id, "bob").await.unwrap();

        assert_eq!(admission.leave(&room_id, "ann").await.unwrap(), MemberStatus::Participant);
        // still waitlisted: leaving does not promote
        assert!(matches!(
            admission.admit(&room_id, "bob").await.unwrap(),
            AdmitOutcome::Waitlisted { .. }
        ));
        // after leaving the waitlist the retry takes the free seat
        admission.leave(&room_id, "bob").await.unwrap();
        assert!(matches!(admission.admit(&room_id, "bob").await.unwrap(), AdmitOutcome::Admitted(_)));
    }

    #[tokio::test]
    async fn leave_unknown_identity_is_not_found() {
        let (_dir, _store, admission, room_id) = setup(1).await;
        assert!(matches!(admission.leave(&room_id, "ghost").await, Err(AppErr::NotFound(_))));
        assert!(matches!(admission.leave("missing", "ann").await, Err(AppErr::NotFound(_))));
    }
}
