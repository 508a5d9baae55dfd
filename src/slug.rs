/**
 * Slug Generation
 * Derives the URL-safe lookup key for blog posts from their title and
 * resolves collisions against already-persisted posts.
 */
use sqlx::PgPool;
use uuid::Uuid;

/// Base used when a title strips down to nothing ("!!!", "???", ...).
/// The slug column is unique and required, so an empty slug is never written.
const EMPTY_TITLE_FALLBACK: &str = "untitled";

/// Lowercase the title, keep only ASCII alphanumerics, and collapse every run
/// of whitespace and hyphens into a single hyphen. Other characters are
/// stripped without breaking the surrounding word, and the result never
/// starts or ends with a hyphen.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.chars().flat_map(|c| c.to_lowercase()) {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' {
            pending_hyphen = true;
        }
    }

    slug
}

/// `slugify` plus the non-empty fallback for degenerate titles.
pub fn slug_base(title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        EMPTY_TITLE_FALLBACK.to_string()
    } else {
        slug
    }
}

/// Probe for a free slug starting from `base`, appending `-1`, `-2`, ... on
/// each collision. `exclude_id` is the post being saved, so re-saving an
/// unchanged title never collides with its own row.
///
/// The probe is advisory only: two concurrent creates with the same title can
/// both observe no conflict, and the unique index on `blogs.slug` then rejects
/// the second insert, which surfaces as a uniqueness conflict.
pub async fn ensure_unique_slug(
    pool: &PgPool,
    base: &str,
    exclude_id: Option<Uuid>,
) -> Result<String, sqlx::Error> {
    let mut candidate = base.to_string();
    let mut suffix: u32 = 0;

    loop {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM blogs WHERE slug = $1 AND ($2::uuid IS NULL OR id <> $2))",
        )
        .bind(&candidate)
        .bind(exclude_id)
        .fetch_one(pool)
        .await?;

        if !taken {
            return Ok(candidate);
        }

        suffix += 1;
        candidate = format!("{}-{}", base, suffix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic_title() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
    }

    #[test]
    fn test_slugify_collapses_separator_runs() {
        assert_eq!(slugify("Rust  --  Async   Patterns"), "rust-async-patterns");
    }

    #[test]
    fn test_slugify_trims_hyphens() {
        assert_eq!(slugify("  -- Leading and trailing --  "), "leading-and-trailing");
    }

    #[test]
    fn test_slugify_strips_punctuation_without_splitting_words() {
        assert_eq!(slugify("C# & F# (a comparison)"), "c-f-a-comparison");
        assert_eq!(slugify("don't panic"), "dont-panic");
    }

    #[test]
    fn test_slugify_keeps_digits() {
        assert_eq!(slugify("Top 10 Crates of 2025"), "top-10-crates-of-2025");
    }

    #[test]
    fn test_slugify_output_charset() {
        for title in [
            "Hello, World!",
            "  spaced   out  ",
            "ÜBER-Längen: was nun?",
            "__init__",
            "a---b___c   d",
        ] {
            let slug = slugify(title);
            assert!(
                slug.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
                "unexpected character in slug {:?}",
                slug
            );
            assert!(!slug.starts_with('-'), "leading hyphen in {:?}", slug);
            assert!(!slug.ends_with('-'), "trailing hyphen in {:?}", slug);
        }
    }

    #[test]
    fn test_slugify_empty_result() {
        assert_eq!(slugify("!!!"), "");
        assert_eq!(slugify("   "), "");
    }

    #[test]
    fn test_slug_base_falls_back_for_degenerate_titles() {
        assert_eq!(slug_base("!!!"), "untitled");
        assert_eq!(slug_base(""), "untitled");
        assert_eq!(slug_base("Hello, World!"), "hello-world");
    }

    #[tokio::test]
    async fn test_collision_suffix_and_self_exclusion_against_store() {
        let Some(pool) = crate::db::connect_test_pool().await else {
            return;
        };

        let base = format!("release-notes-{}", Uuid::new_v4().simple());
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO blogs
                   (title, slug, content, thumbnail_url, thumbnail_storage_id, owner_id)
               VALUES ($1, $2, 'body', '/uploads/images/t.png', 't.png', $3)
               RETURNING id"#,
        )
        .bind(&base)
        .bind(&base)
        .bind(Uuid::new_v4())
        .fetch_one(&pool)
        .await
        .unwrap();

        // A second post with the same base gets the first numeric suffix.
        let suffixed = ensure_unique_slug(&pool, &base, None).await.unwrap();
        assert_eq!(suffixed, format!("{}-1", base));

        // Re-saving the post itself must not collide with its own row.
        let unchanged = ensure_unique_slug(&pool, &base, Some(id)).await.unwrap();
        assert_eq!(unchanged, base);

        sqlx::query("DELETE FROM blogs WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await
            .unwrap();
    }
}
