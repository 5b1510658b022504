//! Text clean-up applied before content goes back to the model or the user.
//!
//! Tool results lose base64 data URIs and long hex blobs and are truncated to
//! a byte budget. Final answers lose model reasoning blocks.

use once_cell::sync::Lazy;
use regex::Regex;

/// Default maximum result size in bytes (16 KB).
pub const DEFAULT_MAX_RESULT_BYTES: usize = 16_384;

/// Minimum tool result budget in bytes (1 KB).
pub const MIN_RESULT_BUDGET: usize = 1024;

/// Approximate bytes per token for budget estimation.
const BYTES_PER_TOKEN: usize = 4;

/// Minimum length of a contiguous hex string to be stripped.
const MIN_HEX_BLOB_LEN: usize = 200;

static BASE64_URI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"data:[a-zA-Z0-9/+\-\.]+;base64,[A-Za-z0-9+/=]+").unwrap());

static HEX_BLOB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"[0-9a-fA-F]{{{},}}", MIN_HEX_BLOB_LEN)).unwrap());

static REASONING_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(think|thinking|reasoning)>.*?</(?:think|thinking|reasoning)>").unwrap()
});

static REASONING_CLOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(?:think|thinking|reasoning)>").unwrap());

static REASONING_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(?:think|thinking|reasoning)>").unwrap());

/// Sanitize a tool result string.
///
/// 1. Replace `data:...;base64,...` URIs with a placeholder.
/// 2. Replace hex blobs (>= 200 hex chars) with a placeholder.
/// 3. Truncate to `max_bytes` if still too large.
pub fn sanitize_tool_result(result: &str, max_bytes: usize) -> String {
    let mut out = BASE64_URI_RE
        .replace_all(result, |caps: &regex::Captures| {
            format!("[base64 data removed, {} bytes]", caps[0].len())
        })
        .into_owned();

    out = HEX_BLOB_RE
        .replace_all(&out, |caps: &regex::Captures| {
            format!("[hex data removed, {} chars]", caps[0].len())
        })
        .into_owned();

    if out.len() > max_bytes {
        let total = out.len();
        let mut cut = max_bytes;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str(&format!("\n...[truncated, {} total bytes]", total));
    }

    out
}

/// Byte budget per tool result given the remaining context capacity.
///
/// Remaining tokens are converted to bytes, shared across the pending
/// results and clamped to [`MIN_RESULT_BUDGET`]..=`max_bytes`.
pub fn compute_tool_result_budget(
    context_limit: usize,
    current_usage_tokens: usize,
    pending_result_count: usize,
    max_bytes: usize,
) -> usize {
    let remaining_tokens = context_limit.saturating_sub(current_usage_tokens);
    let remaining_bytes = remaining_tokens.saturating_mul(BYTES_PER_TOKEN);
    let per_result = remaining_bytes / pending_result_count.max(1);
    per_result.clamp(MIN_RESULT_BUDGET, max_bytes.max(MIN_RESULT_BUDGET))
}

/// Remove model reasoning from a final answer.
///
/// Drops complete `<think>`, `<thinking>` and `<reasoning>` blocks. When a
/// closing marker is left without its opening tag, everything up to and
/// including it is dropped; an opening tag that is never closed cuts the
/// text at that point.
///
/// ```
/// use clawcore::utils::sanitize::strip_reasoning;
///
/// assert_eq!(strip_reasoning("<think>plan</think>Answer"), "Answer");
/// assert_eq!(strip_reasoning("half a thought</thinking> Answer"), "Answer");
/// ```
pub fn strip_reasoning(text: &str) -> String {
    let mut out = REASONING_BLOCK_RE.replace_all(text, "").into_owned();

    if let Some(last_close) = REASONING_CLOSE_RE.find_iter(&out).last() {
        out = out[last_close.end()..].to_string();
    }

    if let Some(open) = REASONING_OPEN_RE.find(&out) {
        out.truncate(open.start());
    }

    out.trim().to_string()
}
