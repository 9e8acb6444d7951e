//! Size-bounded context built from ranked retrieval candidates.
//!
//! Layout of one entry:
//!
//! ```text
//! [Note 1: "Title"]
//! body excerpt
//! ```
//!
//! Entries are joined by [`SEPARATOR`]. When the full layout would exceed the
//! budget, bodies are shortened with rank-weighted shares first; whole
//! entries are dropped from the tail only when their labels alone do not fit.

use tracing::{debug, trace};

use crate::core::config::ContextConfig;
use crate::core::note::{strip_markup, truncate_chars};
use crate::search::RetrievalCandidate;

pub const SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    per_note_chars: usize,
    max_notes: usize,
}

impl ContextAssembler {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            per_note_chars: config.per_note_chars,
            max_notes: config.max_notes,
        }
    }

    /// Join the top candidates into a context of at most `max_chars`
    /// characters.
    pub fn assemble(&self, candidates: &[RetrievalCandidate], max_chars: usize) -> String {
        let mut headers: Vec<String> = Vec::new();
        let mut bodies: Vec<String> = Vec::new();
        for (i, candidate) in candidates.iter().take(self.max_notes).enumerate() {
            headers.push(format!("[Note {}: \"{}\"]\n", i + 1, candidate.title));
            let body = strip_markup(&candidate.snippet);
            bodies.push(truncate_chars(body.trim(), self.per_note_chars).to_string());
        }

        let sep_len = SEPARATOR.chars().count();
        let fixed_len = |n: usize, headers: &[String]| -> usize {
            headers.iter().take(n).map(|h| h.chars().count()).sum::<usize>()
                + sep_len * n.saturating_sub(1)
        };

        let full_len = fixed_len(headers.len(), &headers)
            + bodies.iter().map(|b| b.chars().count()).sum::<usize>();

        if full_len > max_chars {
            // Drop from the tail only while the labels alone overflow.
            let mut n = headers.len();
            while n > 1 && fixed_len(n, &headers) > max_chars {
                n -= 1;
            }
            if n < headers.len() {
                debug!(kept = n, dropped = headers.len() - n, "Context labels overflow, dropping tail");
                headers.truncate(n);
                bodies.truncate(n);
            }

            let budget = max_chars.saturating_sub(fixed_len(n, &headers));
            let lengths: Vec<usize> = bodies.iter().map(|b| b.chars().count()).collect();
            let shares = weighted_shares(&lengths, budget);
            for (body, share) in bodies.iter_mut().zip(&shares) {
                let cut = truncate_chars(body, *share).len();
                body.truncate(cut);
            }
            trace!(?shares, budget, "Context bodies shortened");
        }

        let context = headers
            .iter()
            .zip(&bodies)
            .map(|(h, b)| format!("{}{}", h, b))
            .collect::<Vec<_>>()
            .join(SEPARATOR);

        // Labels of a single oversized entry can still overflow.
        truncate_chars(&context, max_chars).to_string()
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(&ContextConfig::default())
    }
}

/// Split `budget` among bodies of the given lengths. Rank `i` of `n` gets
/// weight `n - i`; a body shorter than its share keeps its full length and
/// the excess is redistributed among the rest.
fn weighted_shares(lengths: &[usize], budget: usize) -> Vec<usize> {
    let n = lengths.len();
    let mut shares = vec![0usize; n];
    let mut open: Vec<usize> = (0..n).filter(|&i| lengths[i] > 0).collect();
    let mut remaining = budget;

    while !open.is_empty() {
        let total_weight: usize = open.iter().map(|&i| n - i).sum();
        let fits: Vec<usize> = open
            .iter()
            .copied()
            .filter(|&i| lengths[i] * total_weight <= remaining * (n - i))
            .collect();

        if fits.is_empty() {
            for &i in &open {
                shares[i] = remaining * (n - i) / total_weight;
            }
            break;
        }
        for &i in &fits {
            shares[i] = lengths[i];
            remaining -= lengths[i];
        }
        open.retain(|i| !fits.contains(i));
    }
    shares
}
