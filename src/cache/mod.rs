//! The answer cache.
//!
//! At most one [`Answer`] is kept per (name, type, class). Answers learnt from
//! an upstream ("external" answers) age with time and are tracked in a
//! recency list so idle ones can be pruned. Answers compiled from zone files
//! ("local" answers, with a `received_at` of zero) never age and are never
//! pruned.
//!
//! # Example
//!
//! ```rust
//! use rdns::cache::{Answer, Cache};
//! use rdns::{Class, Message, Question, Type};
//! use std::time::Duration;
//!
//! let cache = Cache::new(Duration::from_secs(60), Duration::from_secs(3600), 0);
//! let question = Question::new("example.com", Type::A, Class::Internet);
//!
//! let message = Message::query(question.clone(), 1, true);
//! assert!(cache.upsert(Answer::external(question.clone(), message)));
//! assert!(cache.get(&question).is_some());
//! ```

mod lru;
mod snapshot;

use crate::Message;
use crate::Question;
use chrono::Utc;
use log::debug;
use lru::LruList;
use lru::NodeId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

/// Current time, in seconds since the epoch.
pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}

/// A cached response message and its bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct Answer {
    pub question: Question,
    pub message: Message,

    /// When the message was received from upstream, in seconds since the
    /// epoch. Zero marks a local answer.
    pub received_at: i64,

    /// When the answer was last read or written, in seconds since the epoch.
    pub accessed_at: i64,
}

impl Answer {
    /// An answer just received from an upstream.
    pub fn external(question: Question, message: Message) -> Answer {
        let now = now();
        Answer::at(question, message, now, now)
    }

    /// An authoritative answer, which never expires.
    pub fn local(question: Question, message: Message) -> Answer {
        Answer::at(question, message, 0, 0)
    }

    pub fn at(question: Question, message: Message, received_at: i64, accessed_at: i64) -> Answer {
        Answer {
            question,
            message,
            received_at,
            accessed_at,
        }
    }

    pub fn is_local(&self) -> bool {
        self.received_at == 0
    }

    /// Seconds since the answer was received. Always zero for local answers.
    pub fn age(&self, now: i64) -> u32 {
        if self.is_local() {
            return 0;
        }
        u32::try_from((now - self.received_at).max(0)).unwrap_or(u32::MAX)
    }

    /// True once any record's TTL has run out. Local answers never expire.
    pub fn is_expired(&self, now: i64) -> bool {
        if self.is_local() {
            return false;
        }
        match self.message.min_ttl() {
            Some(ttl) => self.age(now) >= ttl,
            None => true,
        }
    }
}

#[derive(Debug)]
struct Entry {
    answer: Answer,

    /// Position in the recency list, only set for external answers.
    node: Option<NodeId>,
}

fn find_mut<'a>(buckets: &'a mut HashMap<String, Vec<Entry>>, q: &Question) -> Option<&'a mut Entry> {
    buckets
        .get_mut(&q.name)?
        .iter_mut()
        .find(|e| e.answer.question.r#type == q.r#type && e.answer.question.class == q.class)
}

#[derive(Debug, Default)]
struct Inner {
    /// Entries bucketed by name, then distinguished by (type, class).
    buckets: HashMap<String, Vec<Entry>>,
    lru: LruList<Question>,
}

impl Inner {
    fn find(&self, q: &Question) -> Option<&Entry> {
        self.buckets
            .get(&q.name)?
            .iter()
            .find(|e| e.answer.question.r#type == q.r#type && e.answer.question.class == q.class)
    }

    fn remove(&mut self, q: &Question) -> Option<Answer> {
        let bucket = self.buckets.get_mut(&q.name)?;
        let pos = bucket
            .iter()
            .position(|e| e.answer.question.r#type == q.r#type && e.answer.question.class == q.class)?;

        let entry = bucket.swap_remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(&q.name);
        }
        if let Some(node) = entry.node {
            self.lru.remove(node);
        }
        Some(entry.answer)
    }
}

/// A thread safe answer cache. A single lock covers both the lookup map and
/// the recency list, so the two are never seen out of step.
#[derive(Debug)]
pub struct Cache {
    inner: Mutex<Inner>,

    prune_delay: Duration,

    /// Offset, in negative seconds, from now before which an unused
    /// external answer is pruned.
    prune_threshold: i64,

    /// Limit on external answers. Zero is unlimited.
    max_entries: usize,
}

impl Default for Cache {
    fn default() -> Self {
        Cache::new(Duration::from_secs(60), Duration::from_secs(3600), 0)
    }
}

impl Cache {
    /// Creates a cache pruned every `prune_delay`, of answers not accessed for
    /// `prune_threshold`, holding at most `max_entries` external answers
    /// (zero for no limit).
    pub fn new(prune_delay: Duration, prune_threshold: Duration, max_entries: usize) -> Cache {
        Cache {
            inner: Mutex::new(Inner::default()),
            prune_delay,
            prune_threshold: -i64::try_from(prune_threshold.as_secs()).unwrap_or(i64::MAX),
            max_entries,
        }
    }

    /// How often [`Cache::prune`] should be called.
    pub fn prune_delay(&self) -> Duration {
        self.prune_delay
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every operation leaves the map and list consistent before it can panic.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Looks up the answer for `question`.
    ///
    /// The returned copy has had its TTLs reduced by the time since it was
    /// received, in its packed form as well, and its `received_at` moved to
    /// now. An external hit becomes the most recently used.
    pub fn get(&self, question: &Question) -> Option<Answer> {
        self.get_at(question, now())
    }

    pub(crate) fn get_at(&self, question: &Question, now: i64) -> Option<Answer> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let entry = find_mut(&mut inner.buckets, question)?;

        if !entry.answer.is_local() {
            entry.answer.accessed_at = now;
        }
        if let Some(node) = entry.node {
            inner.lru.move_to_back(node);
        }

        let mut answer = entry.answer.clone();
        drop(guard);

        if !answer.is_local() {
            answer.message.decrement_ttl(answer.age(now));
            answer.received_at = now;
        }
        Some(answer)
    }

    /// Inserts the answer, or updates the existing entry for the same
    /// question in place. Returns true if this was an insert.
    ///
    /// An external answer never replaces a local one; such an upsert is
    /// ignored and reported as an update.
    pub fn upsert(&self, answer: Answer) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if let Some(entry) = find_mut(&mut inner.buckets, &answer.question) {
            if entry.answer.is_local() && !answer.is_local() {
                debug!("ignoring upstream answer for local {:?}", answer.question);
                return false;
            }

            match (entry.node, answer.is_local()) {
                (Some(node), false) => inner.lru.move_to_back(node),
                (Some(node), true) => {
                    inner.lru.remove(node);
                    entry.node = None;
                }
                (None, false) => entry.node = Some(inner.lru.push_back(answer.question.clone())),
                (None, true) => (),
            }

            entry.answer = answer;
            return false;
        }

        let node = match answer.is_local() {
            true => None,
            false => Some(inner.lru.push_back(answer.question.clone())),
        };

        inner
            .buckets
            .entry(answer.question.name.clone())
            .or_default()
            .push(Entry { answer, node });

        if self.max_entries > 0 {
            while inner.lru.len() > self.max_entries {
                let oldest = match inner.lru.front() {
                    Some((_, q)) => q.clone(),
                    None => break,
                };
                debug!("evicting {:?}", oldest);
                inner.remove(&oldest);
            }
        }

        true
    }

    /// Removes the answer for `question`, returning it if it was present.
    pub fn remove(&self, question: &Question) -> Option<Answer> {
        self.lock().remove(question)
    }

    /// Removes every external answer not accessed within the prune
    /// threshold, returning how many were removed.
    pub fn prune(&self) -> usize {
        self.prune_at(now())
    }

    pub(crate) fn prune_at(&self, now: i64) -> usize {
        let cutoff = now + self.prune_threshold;
        let mut inner = self.lock();
        let mut pruned = 0;

        loop {
            let question = match inner.lru.front() {
                Some((_, q)) => q.clone(),
                None => break,
            };

            // The list is in access order, so the first fresh entry ends the walk.
            match inner.find(&question) {
                Some(e) if e.answer.accessed_at >= cutoff => break,
                _ => (),
            }

            inner.remove(&question);
            pruned += 1;
        }

        pruned
    }

    /// The external answers, from least to most recently used.
    pub fn list(&self) -> Vec<Answer> {
        let inner = self.lock();
        inner
            .lru
            .iter()
            .filter_map(|q| inner.find(q))
            .map(|e| e.answer.clone())
            .collect()
    }

    /// The number of answers, local and external.
    pub fn len(&self) -> usize {
        self.lock().buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Class, Record, Resource, Type, QR};
    use pretty_assertions::assert_eq;

    fn question(name: &str) -> Question {
        Question::new(name, Type::A, Class::Internet)
    }

    fn message(name: &str, ttl: u32, ip: &str) -> Message {
        let mut m = Message {
            qr: QR::Response,
            ..Default::default()
        };
        m.add_question(name, Type::A, Class::Internet);
        m.answers.push(Record::new(
            name,
            Class::Internet,
            ttl,
            Resource::A(ip.parse().unwrap()),
        ));
        m.pack().unwrap();
        m
    }

    fn names(answers: &[Answer]) -> Vec<&str> {
        answers.iter().map(|a| a.question.name.as_str()).collect()
    }

    #[test]
    fn test_one_per_key() {
        let cache = Cache::default();
        let q = question("a.example.com");

        assert!(cache.upsert(Answer::at(q.clone(), message("a.example.com", 60, "192.0.2.1"), 10, 10)));
        assert!(!cache.upsert(Answer::at(q.clone(), message("a.example.com", 60, "192.0.2.2"), 20, 20)));
        assert!(!cache.upsert(Answer::at(q.clone(), message("a.example.com", 60, "192.0.2.3"), 30, 30)));

        assert_eq!(cache.len(), 1);
        let list = cache.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].message, message("a.example.com", 60, "192.0.2.3"));
        assert_eq!(list[0].received_at, 30);
        assert_eq!(list[0].accessed_at, 30);
    }

    #[test]
    fn test_lru_order() {
        let cache = Cache::default();
        let now = now();
        for name in ["a", "b", "c"] {
            cache.upsert(Answer::at(question(name), message(name, 3600, "192.0.2.1"), now, now));
        }

        cache.get(&question("a")).unwrap();
        assert_eq!(names(&cache.list()), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_ttl_decay() {
        let cache = Cache::default();
        let now = now();

        let q = question("external");
        cache.upsert(Answer::at(q.clone(), message("external", 3600, "192.0.2.1"), now - 5, now - 5));
        let answer = cache.get_at(&q, now).unwrap();
        assert_eq!(answer.message.answers[0].ttl, 3595);
        assert!(!answer.is_expired(now));

        // The packed form is patched too.
        let decoded = Message::from_slice(answer.message.packet().unwrap()).unwrap();
        assert_eq!(decoded.answers[0].ttl, 3595);

        let q = question("local");
        cache.upsert(Answer::local(q.clone(), message("local", 3600, "192.0.2.1")));
        let answer = cache.get_at(&q, now + 10_000).unwrap();
        assert_eq!(answer.message.answers[0].ttl, 3600);
        assert!(!answer.is_expired(now + 10_000));
    }

    #[test]
    fn test_expired() {
        let cache = Cache::default();
        let now = now();
        let q = question("example.com");
        cache.upsert(Answer::at(q.clone(), message("example.com", 30, "192.0.2.1"), now - 31, now - 31));

        let answer = cache.get_at(&q, now).unwrap();
        assert!(answer.is_expired(now));
        assert_eq!(answer.message.answers[0].ttl, 0);
    }

    #[test]
    fn test_prune() {
        let cache = Cache::new(Duration::from_secs(60), Duration::from_secs(100), 0);
        let now = now();
        cache.upsert(Answer::at(question("old1"), message("old1", 3600, "192.0.2.1"), now - 500, now - 500));
        cache.upsert(Answer::at(question("old2"), message("old2", 3600, "192.0.2.1"), now - 200, now - 200));
        cache.upsert(Answer::at(question("new"), message("new", 3600, "192.0.2.1"), now - 10, now - 10));
        cache.upsert(Answer::local(question("local"), message("local", 3600, "192.0.2.1")));

        assert_eq!(cache.prune_at(now), 2);
        assert_eq!(names(&cache.list()), vec!["new"]);
        assert!(cache.get_at(&question("old1"), now).is_none());
        assert!(cache.get_at(&question("old2"), now).is_none());
        assert!(cache.get_at(&question("local"), now).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_local_wins() {
        let cache = Cache::default();
        let q = question("example.com");
        let local = message("example.com", 60, "192.0.2.1");

        cache.upsert(Answer::local(q.clone(), local.clone()));
        assert!(!cache.upsert(Answer::external(q.clone(), message("example.com", 60, "192.0.2.9"))));
        assert_eq!(cache.get(&q).unwrap().message, local);
        assert!(cache.list().is_empty());

        // A local answer replaces an external one, and leaves the recency list.
        let q = question("other.com");
        cache.upsert(Answer::external(q.clone(), message("other.com", 60, "192.0.2.1")));
        cache.upsert(Answer::local(q.clone(), message("other.com", 60, "192.0.2.2")));
        assert!(cache.get(&q).unwrap().is_local());
        assert!(cache.list().is_empty());
    }

    #[test]
    fn test_max_entries() {
        let cache = Cache::new(Duration::from_secs(60), Duration::from_secs(3600), 2);
        for name in ["a", "b", "c"] {
            cache.upsert(Answer::external(question(name), message(name, 60, "192.0.2.1")));
        }
        assert_eq!(names(&cache.list()), vec!["b", "c"]);
        assert!(cache.get(&question("a")).is_none());
    }

    #[test]
    fn test_remove() {
        let cache = Cache::default();
        let q = question("example.com");
        cache.upsert(Answer::external(q.clone(), message("example.com", 60, "192.0.2.1")));
        assert!(cache.remove(&q).is_some());
        assert!(cache.remove(&q).is_none());
        assert!(cache.is_empty());
        assert!(cache.list().is_empty());
    }
}
