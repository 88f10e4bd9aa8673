//! Unique, human-friendly slug allocation.
//!
//! Derivation bridges ASCII slugification (`slug` crate) with Chinese
//! transliteration (`pinyin` crate) so inputs like “燕麦奶” become
//! `yan-mai-nai`. Allocation is read-then-decide: the namespace is queried
//! once for the whole `base(-N)?` family and the next free suffix is picked
//! locally. Two concurrent allocations for the same title can therefore
//! propose the same slug; the database uniqueness constraint is the final
//! arbiter, and callers are expected to retry allocation once when an insert
//! reports a uniqueness violation.

use async_trait::async_trait;
use pinyin::{Pinyin, ToPinyin};
use slug::slugify;
use thiserror::Error;
use uuid::Uuid;

/// Matches the reference `slug` column width.
pub const DEFAULT_MAX_LENGTH: usize = 255;

/// Room reserved for a numeric suffix when the base has to be truncated.
const SUFFIX_RESERVE: usize = 6;

/// Errors that can occur while deriving a slug from a title.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
}

/// Errors that can occur during allocation against a namespace.
#[derive(Debug, Error)]
pub enum SlugAllocationError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error(transparent)]
    Namespace(E),
}

/// A namespace (one model's table/column) that can report existing slugs.
#[async_trait]
pub trait SlugNamespace: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Return every live slug belonging to the `base(-N)?` family, excluding
    /// the row identified by `exclude_id` when given (used on rename).
    ///
    /// Implementations may over-report (e.g. return everything with the
    /// `base` prefix); the allocator filters to the exact family itself.
    async fn sibling_slugs(
        &self,
        base: &str,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<String>, Self::Error>;
}

/// Derive a base slug from the provided human-readable title.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let transliterated = transliterate_to_ascii(input);
    let candidate = slugify(&transliterated);

    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }

    Ok(candidate)
}

/// Whether a string is a well-formed slug (`^[a-z0-9-]+$`).
#[must_use]
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .bytes()
            .all(|byte| matches!(byte, b'a'..=b'z' | b'0'..=b'9' | b'-'))
}

/// Allocates slugs unique within a [`SlugNamespace`].
#[derive(Debug, Clone, Copy)]
pub struct SlugAllocator {
    max_length: usize,
}

impl Default for SlugAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LENGTH)
    }
}

impl SlugAllocator {
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Produce a slug for `title` that is unique among the namespace's live
    /// rows, appending `-<n>` only on collision.
    pub async fn allocate<N>(
        &self,
        namespace: &N,
        title: &str,
        exclude_id: Option<Uuid>,
    ) -> Result<String, SlugAllocationError<N::Error>>
    where
        N: SlugNamespace + ?Sized,
    {
        let base = truncate_base(&derive_slug(title)?, self.max_length);
        let existing = namespace
            .sibling_slugs(&base, exclude_id)
            .await
            .map_err(SlugAllocationError::Namespace)?;

        Ok(next_in_family(&base, &existing, self.max_length))
    }
}

/// Truncate an over-long base, leaving room for a numeric suffix.
fn truncate_base(base: &str, max_length: usize) -> String {
    if base.len() > max_length {
        // Slugified output is pure ASCII, so byte indexing is safe.
        base[..max_length.saturating_sub(SUFFIX_RESERVE)].to_string()
    } else {
        base.to_string()
    }
}

/// Whether `candidate` is `base` itself or `base-<digits>`.
fn in_family(base: &str, candidate: &str) -> bool {
    if candidate == base {
        return true;
    }
    match candidate.strip_prefix(base).and_then(|s| s.strip_prefix('-')) {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Pick the next free slug in the family given the namespace's current slugs.
fn next_in_family(base: &str, existing: &[String], max_length: usize) -> String {
    let family: Vec<&str> = existing
        .iter()
        .map(String::as_str)
        .filter(|slug| in_family(base, slug))
        .collect();

    if !family.contains(&base) {
        return base.to_string();
    }

    let prefix_len = base.len() + 1;
    let max_suffix = family
        .iter()
        .filter_map(|slug| slug.get(prefix_len..))
        .filter_map(|digits| digits.parse::<u64>().ok())
        .max()
        .unwrap_or(0);

    let suffix = format!("-{}", max_suffix + 1);
    if base.len() + suffix.len() > max_length {
        // Trim the base, never the suffix, so the counter survives intact.
        let trimmed = &base[..max_length - suffix.len()];
        format!("{trimmed}{suffix}")
    } else {
        format!("{base}{suffix}")
    }
}

fn transliterate_to_ascii(input: &str) -> String {
    let mut output = String::with_capacity(input.len());

    for ch in input.chars() {
        if ch.is_ascii() {
            output.push(ch);
            continue;
        }

        match ch.to_pinyin() {
            Some(py) => append_pinyin(&mut output, py),
            None if ch.is_whitespace() => output.push(' '),
            None => {
                // Preserve unhandled characters so slugify can decide how to filter them.
                output.push(ch);
            }
        }
    }

    output
}

fn append_pinyin(buffer: &mut String, pinyin: Pinyin) {
    if !buffer.is_empty() && !buffer.ends_with(' ') {
        buffer.push(' ');
    }
    buffer.push_str(pinyin.plain());
}
