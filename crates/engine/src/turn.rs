// SPDX-License-Identifier: MIT

//! Cancellation-noise suppression (spec §4.4). Turn-completion inference
//! itself lives on `IssueLogEntry::signals_turn_completed` in `bitk-core`,
//! since both the engine and adapters' unit tests need it.

use bitk_core::IssueLogEntry;

/// Fixed phrases suppressed after a user cancellation, matched against an
/// entry whose `metadata.resultSubtype=error_during_execution` (spec §4.4).
pub const CANCEL_NOISE_PHRASES: &[&str] = &[
    "request was aborted",
    "request interrupted by user",
    "rust analyzer lsp crashed",
    "rust-analyzer-lsp",
];

/// Whether this entry is noise to drop after a user cancellation. The
/// turn-completion signal it may also carry is still honored by the
/// caller (spec §4.4: "If such an entry also carries a turn-completion
/// signal, the turn is still completed").
pub fn is_cancellation_noise(entry: &IssueLogEntry) -> bool {
    let Some(meta) = &entry.metadata else {
        return false;
    };
    if meta.result_subtype() != Some("error_during_execution") {
        return false;
    }
    let haystack = entry.content.to_lowercase();
    CANCEL_NOISE_PHRASES.iter().any(|p| haystack.contains(p))
}
