/// Key layout for the fjall partitions
///
/// Partition structure:
/// - `jobs`: job:{job_id} -> Job (JSON)
/// - `queues`: q:{queue}:{seq:020} -> job_id, m:{queue}:{job_id} -> seq (u64 BE)
/// - `metadata`: next_seq -> u64 (BE)

pub const JOB_KEY_PREFIX: &str = "job:";

/// Named pending queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Downloads,
    Callbacks,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::Downloads => "downloads",
            Queue::Callbacks => "callbacks",
        }
    }
}

/// Encode a job key: job:{job_id}
pub fn encode_job_key(job_id: &str) -> String {
    format!("{}{}", JOB_KEY_PREFIX, job_id)
}

/// Decode a job key: job:{job_id} -> job_id
pub fn decode_job_key(key: &str) -> Option<&str> {
    key.strip_prefix(JOB_KEY_PREFIX).filter(|id| !id.is_empty())
}

/// Encode a queue entry key: q:{queue}:{seq:020}
///
/// Zero padding keeps lexicographic order equal to enqueue order.
pub fn encode_entry_key(queue: Queue, seq: u64) -> Vec<u8> {
    format!("q:{}:{:020}", queue.as_str(), seq).into_bytes()
}

/// Sequence number of a queue entry key: q:{queue}:{seq} -> seq
pub fn decode_entry_seq(key: &[u8]) -> Option<u64> {
    let key = std::str::from_utf8(key).ok()?;
    let (_, seq) = key.strip_prefix("q:")?.split_once(':')?;
    seq.parse().ok()
}

/// Prefix covering every entry of a queue: q:{queue}:
pub fn encode_entry_prefix(queue: Queue) -> Vec<u8> {
    format!("q:{}:", queue.as_str()).into_bytes()
}

/// Encode a queue membership key: m:{queue}:{job_id}
pub fn encode_member_key(queue: Queue, job_id: &str) -> Vec<u8> {
    format!("m:{}:{}", queue.as_str(), job_id).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_encoding() {
        let key = encode_job_key("job_123");
        assert_eq!(key, "job:job_123");
        assert_eq!(decode_job_key(&key), Some("job_123"));
    }

    #[test]
    fn test_decode_rejects_foreign_keys() {
        assert_eq!(decode_job_key("log:job_123"), None);
        assert_eq!(decode_job_key("job:"), None);
    }

    #[test]
    fn test_entry_keys_sort_by_sequence() {
        let a = encode_entry_key(Queue::Callbacks, 9);
        let b = encode_entry_key(Queue::Callbacks, 10);
        assert!(a < b);
        assert_eq!(a, b"q:callbacks:00000000000000000009");
        assert!(a.starts_with(&encode_entry_prefix(Queue::Callbacks)));
        assert_eq!(decode_entry_seq(&b), Some(10));
        assert_eq!(decode_entry_seq(b"m:callbacks:job_1"), None);
        assert!(!a.starts_with(&encode_entry_prefix(Queue::Downloads)));
    }

    #[test]
    fn test_member_key_encoding() {
        let key = encode_member_key(Queue::Downloads, "abc");
        assert_eq!(key, b"m:downloads:abc");
    }
}
