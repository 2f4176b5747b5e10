use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;

use viewer_api::{StoredMessage, TopicSummary, display_label};

// ═══════════════════════════════════════════════════════════════
//  TopicRecord
// ═══════════════════════════════════════════════════════════════

/// Состояние одного ключа агрегации: ring-buffer последних сообщений,
/// счётчик всех когда-либо полученных и время последнего сообщения.
#[derive(Debug, Clone)]
struct TopicRecord {
    messages: VecDeque<StoredMessage>,
    message_count: u64,
    last_seen_ms: i64,
    stale: bool,
}

impl TopicRecord {
    fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(1024)),
            message_count: 0,
            last_seen_ms: 0,
            stale: false,
        }
    }

    fn push(&mut self, message: StoredMessage, capacity: usize) {
        self.last_seen_ms = message.ts_ms;
        self.message_count += 1;
        if self.messages.len() >= capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    fn truncate_to(&mut self, capacity: usize) {
        let excess = self.messages.len().saturating_sub(capacity);
        self.messages.drain(..excess);
    }

    fn messages(&self) -> impl Iterator<Item = &StoredMessage> {
        self.messages.iter()
    }

    /// Сколько сообщений сейчас в буфере.
    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.messages.len()
    }

    /// Всего сообщений за время жизни записи, независимо от вытеснения.
    fn message_count(&self) -> u64 {
        self.message_count
    }

    #[cfg(test)]
    fn last_seen_ms(&self) -> i64 {
        self.last_seen_ms
    }

    fn is_stale(&self) -> bool {
        self.stale
    }

    fn summary(&self, key: &str) -> TopicSummary {
        TopicSummary {
            key: key.to_string(),
            label: display_label(key, self.message_count),
            message_count: self.message_count,
            buffered: self.messages.len(),
            last_seen_ms: self.last_seen_ms,
            stale: self.stale,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Outcomes
// ═══════════════════════════════════════════════════════════════

/// Результат ingest: хватает, чтобы решить, какое событие отправить
/// presentation layer'у.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// true — ключ появился впервые (набор topic'ов изменился).
    pub created: bool,
    pub summary: TopicSummary,
}

/// Флаг staleness, изменившийся при sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessChange {
    pub key: String,
    pub stale: bool,
}

// ═══════════════════════════════════════════════════════════════
//  TopicStore
// ═══════════════════════════════════════════════════════════════

/// In-memory хранилище всех topic'ов viewer'а.
///
/// Единственный владелец TopicRecord'ов. Записи создаются лениво при
/// первом сообщении и исчезают только при `reset()`.
#[derive(Debug)]
pub struct TopicStore {
    records: HashMap<String, TopicRecord>,
    capacity: NonZeroUsize,
}

impl TopicStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            records: HashMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Добавить сообщение в буфер ключа `key`, вытесняя самое старое
    /// при заполнении.
    pub fn ingest(&mut self, key: &str, message: StoredMessage) -> IngestOutcome {
        let capacity = self.capacity.get();
        let created = !self.records.contains_key(key);
        let record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| TopicRecord::new(capacity));
        record.push(message, capacity);
        if created {
            tracing::debug!(topic = %key, "new topic");
        }
        IngestOutcome {
            created,
            summary: record.summary(key),
        }
    }

    /// Ключи, отсортированные по отображаемой метке (`"key (count)"`),
    /// при равенстве меток — по ключу. Сравнение побайтовое.
    pub fn list_topics(&self) -> Vec<String> {
        self.summaries().into_iter().map(|s| s.key).collect()
    }

    /// Сводки в том же порядке, что и `list_topics()`.
    pub fn summaries(&self) -> Vec<TopicSummary> {
        let mut summaries: Vec<TopicSummary> = self
            .records
            .iter()
            .map(|(key, record)| record.summary(key))
            .collect();
        summaries.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.key.cmp(&b.key)));
        summaries
    }

    /// Буфер ключа в порядке поступления. Неизвестный ключ → пустой Vec.
    pub fn get_messages(&self, key: &str) -> Vec<StoredMessage> {
        self.records
            .get(key)
            .map(|r| r.messages().cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn get(&self, key: &str) -> Option<&TopicRecord> {
        self.records.get(key)
    }

    pub fn message_count(&self, key: &str) -> Option<u64> {
        self.records.get(key).map(TopicRecord::message_count)
    }

    pub fn is_stale(&self, key: &str) -> Option<bool> {
        self.records.get(key).map(TopicRecord::is_stale)
    }

    pub fn topic_count(&self) -> usize {
        self.records.len()
    }

    /// Новая граница буфера для всех текущих и будущих записей.
    /// Буферы длиннее `capacity` сразу обрезаются до самых новых.
    pub fn reconfigure_capacity(&mut self, capacity: NonZeroUsize) {
        self.capacity = capacity;
        for record in self.records.values_mut() {
            record.truncate_to(capacity.get());
        }
        tracing::info!(capacity = capacity.get(), "topic buffer capacity changed");
    }

    /// Очистить все записи и счётчики.
    pub fn reset(&mut self) {
        let dropped = self.records.len();
        self.records.clear();
        tracing::info!(topics = dropped, "topic store reset");
    }

    /// Пересчитать флаг stale: `now_ms - last_seen_ms > threshold_ms`.
    /// Возвращает только изменившиеся флаги, в порядке ключей.
    pub fn sweep(&mut self, now_ms: i64, threshold_ms: i64) -> Vec<StalenessChange> {
        let mut changes: Vec<StalenessChange> = self
            .records
            .iter_mut()
            .filter_map(|(key, record)| {
                let stale = now_ms - record.last_seen_ms > threshold_ms;
                if stale == record.stale {
                    return None;
                }
                record.stale = stale;
                Some(StalenessChange { key: key.clone(), stale })
            })
            .collect();
        changes.sort_by(|a, b| a.key.cmp(&b.key));
        changes
    }
}
