//! End-to-end slug allocation against an in-memory namespace.

use std::convert::Infallible;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use dispensa::domain::slug::{SlugAllocator, SlugNamespace, is_valid_slug};

/// Namespace double holding `(row id, slug)` pairs. Over-reports by prefix,
/// the way the database query does, leaving exact family matching to the
/// allocator.
#[derive(Default)]
struct MemoryNamespace {
    rows: Mutex<Vec<(Uuid, String)>>,
}

impl MemoryNamespace {
    fn with_slugs(slugs: &[&str]) -> Self {
        let namespace = Self::default();
        for slug in slugs {
            namespace.insert(Uuid::new_v4(), slug);
        }
        namespace
    }

    fn insert(&self, id: Uuid, slug: &str) {
        self.rows
            .lock()
            .expect("rows lock")
            .push((id, slug.to_string()));
    }
}

#[async_trait]
impl SlugNamespace for MemoryNamespace {
    type Error = Infallible;

    async fn sibling_slugs(
        &self,
        base: &str,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<String>, Self::Error> {
        Ok(self
            .rows
            .lock()
            .expect("rows lock")
            .iter()
            .filter(|(id, _)| exclude_id != Some(*id))
            .filter(|(_, slug)| slug.starts_with(base))
            .map(|(_, slug)| slug.clone())
            .collect())
    }
}

#[tokio::test]
async fn fresh_title_gets_the_bare_slug() {
    let namespace = MemoryNamespace::default();
    let allocator = SlugAllocator::default();

    let slug = allocator
        .allocate(&namespace, "Oat Milk", None)
        .await
        .expect("allocate");

    assert_eq!(slug, "oat-milk");
}

#[tokio::test]
async fn collisions_count_past_the_highest_suffix() {
    let namespace = MemoryNamespace::with_slugs(&["bread", "bread-1", "bread-3", "bread-roll"]);
    let allocator = SlugAllocator::default();

    let slug = allocator
        .allocate(&namespace, "Bread", None)
        .await
        .expect("allocate");

    // Gaps are not reused and `bread-roll` is not a family member.
    assert_eq!(slug, "bread-4");
}

#[tokio::test]
async fn repeated_allocation_walks_the_suffix_sequence() {
    let namespace = MemoryNamespace::default();
    let allocator = SlugAllocator::default();

    for expected in ["bread", "bread-1", "bread-2"] {
        let slug = allocator
            .allocate(&namespace, "Bread", None)
            .await
            .expect("allocate");
        assert_eq!(slug, expected);
        namespace.insert(Uuid::new_v4(), &slug);
    }
}

#[tokio::test]
async fn long_titles_are_truncated_with_suffix_room() {
    let namespace = MemoryNamespace::default();
    let allocator = SlugAllocator::new(10);

    let first = allocator
        .allocate(&namespace, "Wholegrain Spelt Sourdough", None)
        .await
        .expect("allocate");
    assert!(first.len() <= 10);
    assert!(is_valid_slug(&first));
    namespace.insert(Uuid::new_v4(), &first);

    let second = allocator
        .allocate(&namespace, "Wholegrain Spelt Sourdough", None)
        .await
        .expect("allocate");
    assert_eq!(second, format!("{first}-1"));
    assert!(second.len() <= 10);
}

#[tokio::test]
async fn rename_keeps_the_rows_own_slug() {
    let namespace = MemoryNamespace::default();
    let allocator = SlugAllocator::default();
    let row_id = Uuid::new_v4();
    namespace.insert(row_id, "bread");

    // Excluding the row itself means its current slug does not collide.
    let kept = allocator
        .allocate(&namespace, "Bread", Some(row_id))
        .await
        .expect("allocate");
    assert_eq!(kept, "bread");

    // A different row renaming to the same title does collide.
    let other = allocator
        .allocate(&namespace, "Bread", Some(Uuid::new_v4()))
        .await
        .expect("allocate");
    assert_eq!(other, "bread-1");
}

#[tokio::test]
async fn chinese_titles_transliterate_before_allocation() {
    let namespace = MemoryNamespace::with_slugs(&["yan-mai-nai"]);
    let allocator = SlugAllocator::default();

    let slug = allocator
        .allocate(&namespace, "燕麦奶", None)
        .await
        .expect("allocate");

    assert_eq!(slug, "yan-mai-nai-1");
}
