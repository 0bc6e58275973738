use std::collections::{btree_map, BTreeMap};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration, Utc};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serenity::all::{ChannelId, GuildId, MessageId, RoleId, UserId};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Zancudo,
    Cayo,
}

/// Announcement kind. Records of different families never alias each other's operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Captures,
    AirDrop,
    Event(EventKind),
    Squad,
}

impl Family {
    pub fn label(self) -> &'static str {
        match self {
            Self::Captures => "Captures",
            Self::AirDrop => "AirDrop",
            Self::Event(EventKind::Zancudo) => "Zancudo",
            Self::Event(EventKind::Cayo) => "Cayo",
            Self::Squad => "Squad",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Captures {
        image_url: Option<String>,
    },
    AirDrop {
        description: String,
        voice_channel: ChannelId,
        role: RoleId,
    },
    Event {
        kind: EventKind,
        role: RoleId,
        voice_channel: ChannelId,
    },
    /// For squads the record's participants are the squad members.
    Squad {
        title: String,
        role: RoleId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupRecord {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub participants: Vec<UserId>,
    /// Snapshot taken at creation, never re-resolved.
    pub author_name: String,
    pub deadline: Option<DateTime<Utc>>,
    pub expired: bool,
    pub payload: Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    Counting(Duration),
    Expired,
}

impl SignupRecord {
    pub fn new(
        id: MessageId,
        channel_id: ChannelId,
        guild_id: Option<GuildId>,
        author_name: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            id,
            channel_id,
            guild_id,
            participants: Vec::new(),
            author_name: author_name.into(),
            deadline: None,
            expired: false,
            payload,
        }
    }

    /// Sets the deadline; a deadline that is not in the future makes the record expired at once.
    pub fn with_deadline(mut self, deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        self.deadline = deadline;
        self.expired = deadline.is_some_and(|deadline| deadline <= now);
        self
    }

    pub fn family(&self) -> Family {
        match &self.payload {
            Payload::Captures { .. } => Family::Captures,
            Payload::AirDrop { .. } => Family::AirDrop,
            Payload::Event { kind, .. } => Family::Event(*kind),
            Payload::Squad { .. } => Family::Squad,
        }
    }

    /// `None` for records without a deadline. Once `expired` is set the answer is always
    /// `Expired`, whatever `now` says.
    pub fn countdown(&self, now: DateTime<Utc>) -> Option<Countdown> {
        let deadline = self.deadline?;
        if self.expired || now >= deadline {
            Some(Countdown::Expired)
        } else {
            Some(Countdown::Counting(deadline - now))
        }
    }

    pub fn label(&self) -> String {
        let name = match &self.payload {
            Payload::Squad { title, .. } => title.as_str(),
            _ => self.family().label(),
        };
        format!(
            "{} (ID: {}) - {} os.",
            name,
            self.id,
            self.participants.len()
        )
    }
}

/// Extracts the message id from a [`SignupRecord::label`] or from a bare id.
pub fn parse_reference(reference: &str) -> Option<MessageId> {
    let reference = reference.trim();
    let raw = match reference.split_once("(ID: ") {
        Some((_, rest)) => rest.split_once(')')?.0,
        None => reference,
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(id) => Some(MessageId::new(id)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
    RecordMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotPresent,
    RecordMissing,
}

struct Entry {
    record: Mutex<SignupRecord>,
    cancel: CancellationToken,
}

/// In-memory sign-up store keyed by announcement message.
///
/// Every operation on a record runs under that record's own mutex, so a membership check and
/// the following insert or removal can never interleave with another handler.
pub struct Registry {
    records: RwLock<BTreeMap<MessageId, Arc<Entry>>>,
    shutdown: CancellationToken,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers a new record. An id that is already live is rejected and left untouched.
    pub async fn create(&self, record: SignupRecord) -> anyhow::Result<MessageId> {
        let id = record.id;
        match self.records.write().await.entry(id) {
            btree_map::Entry::Occupied(_) => anyhow::bail!("a record for message {id} already exists"),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Entry {
                    record: Mutex::new(record),
                    cancel: self.shutdown.child_token(),
                }));
            }
        }
        Ok(id)
    }

    async fn entry(&self, id: MessageId) -> Option<Arc<Entry>> {
        self.records.read().await.get(&id).cloned()
    }

    /// Runs `f` on the record under its lock, if the record exists and belongs to `family`.
    async fn update<R>(
        &self,
        family: Family,
        id: MessageId,
        f: impl FnOnce(&mut SignupRecord) -> R,
    ) -> Option<R> {
        let entry = self.entry(id).await?;
        let mut record = entry.record.lock().await;
        if record.family() != family {
            return None;
        }
        Some(f(&mut *record))
    }

    pub async fn get(&self, family: Family, id: MessageId) -> Option<SignupRecord> {
        self.update(family, id, |record| record.clone()).await
    }

    pub async fn find(&self, id: MessageId) -> Option<SignupRecord> {
        let entry = self.entry(id).await?;
        let record = entry.record.lock().await;
        Some(record.clone())
    }

    /// Like [`Registry::find`], but only for records admins may add members to or remove
    /// members from. Squads are edited through their roster instead.
    pub async fn find_enrollment(&self, id: MessageId) -> Option<SignupRecord> {
        self.find(id)
            .await
            .filter(|record| record.family() != Family::Squad)
    }

    pub async fn add_participant(&self, family: Family, id: MessageId, user: UserId) -> AddOutcome {
        self.update(family, id, |record| {
            if record.participants.contains(&user) {
                AddOutcome::AlreadyPresent
            } else {
                record.participants.push(user);
                AddOutcome::Added
            }
        })
        .await
        .unwrap_or(AddOutcome::RecordMissing)
    }

    pub async fn remove_participant(
        &self,
        family: Family,
        id: MessageId,
        user: UserId,
    ) -> RemoveOutcome {
        self.update(family, id, |record| {
            match record.participants.iter().position(|p| *p == user) {
                Some(index) => {
                    record.participants.remove(index);
                    RemoveOutcome::Removed
                }
                None => RemoveOutcome::NotPresent,
            }
        })
        .await
        .unwrap_or(RemoveOutcome::RecordMissing)
    }

    /// Replaces the member list wholesale, dropping repeated ids. Returns the updated record.
    pub async fn replace_participants(
        &self,
        family: Family,
        id: MessageId,
        users: impl IntoIterator<Item = UserId>,
    ) -> Option<SignupRecord> {
        let mut participants = Vec::new();
        for user in users {
            if !participants.contains(&user) {
                participants.push(user);
            }
        }
        self.update(family, id, |record| {
            record.participants = participants;
            record.clone()
        })
        .await
    }

    /// Flags the record as expired. True only for the call that performed the transition.
    pub async fn mark_expired(&self, id: MessageId) -> bool {
        let Some(entry) = self.entry(id).await else {
            return false;
        };
        let mut record = entry.record.lock().await;
        if record.expired {
            false
        } else {
            record.expired = true;
            true
        }
    }

    /// Drops the record and stops its refresher.
    pub async fn remove(&self, id: MessageId) -> Option<SignupRecord> {
        let entry = self.records.write().await.remove(&id)?;
        entry.cancel.cancel();
        let record = entry.record.lock().await;
        Some(record.clone())
    }

    pub async fn cancellation(&self, id: MessageId) -> Option<CancellationToken> {
        Some(self.entry(id).await?.cancel.clone())
    }

    /// All records, oldest first.
    pub async fn list(&self) -> Vec<SignupRecord> {
        let entries = self.records.read().await.values().cloned().collect::<Vec<_>>();
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            records.push(entry.record.lock().await.clone());
        }
        records
    }

    /// Records that admins can add members to or remove members from: everything but squads.
    pub async fn enrollments(&self) -> Vec<SignupRecord> {
        self.list()
            .await
            .into_iter()
            .filter(|record| record.family() != Family::Squad)
            .collect()
    }

    /// Fuzzy lookup over enrollment labels, best match first.
    pub async fn search(&self, needle: &str, limit: usize) -> Vec<SignupRecord> {
        let enrollments = self.enrollments().await;
        if needle.trim().is_empty() {
            return enrollments.into_iter().rev().take(limit).collect();
        }
        let labelled = enrollments.into_iter().map(|record| (record.label(), record));
        fuzzy_search(needle, labelled, |entry| entry.0.as_str(), limit)
            .into_iter()
            .map(|(_, (_, record))| record)
            .collect()
    }

    /// Cancels every refresher. Records stay readable.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn fuzzy_search<T>(
    needle: &str,
    haystack: impl Iterator<Item = T>,
    key: impl Fn(&T) -> &str,
    limit: usize,
) -> Vec<(i64, T)> {
    static MATCHER: LazyLock<SkimMatcherV2> =
        LazyLock::new(|| SkimMatcherV2::default().ignore_case().use_cache(true));
    let mut scores: Vec<_> = haystack
        .filter_map(|s| MATCHER.fuzzy_match(key(&s), needle).map(|score| (score, s)))
        .collect();
    scores.sort_by_key(|(score, _)| std::cmp::Reverse(*score));
    scores.truncate(limit);
    scores
}
