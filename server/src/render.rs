//! One render pass: template text in, surface entries out.
//!
//! Lines are resolved, translated, made unique and truncated in that order.
//! Uniqueness is checked before truncation, so a suffix that pushes a line
//! past the length limit can be cut off again; those collisions are left as
//! they are.

use crate::resolver::{ResolveError, TemplateResolver};
use crate::surface::Surface;
use log::debug;
use shared::{translate_markup, truncate_entry, SessionUser, RESET_MARKER};
use std::collections::HashSet;

/// Expands placeholders, passing text through untouched without a resolver.
pub fn resolve(
    resolver: Option<&dyn TemplateResolver>,
    user: &SessionUser,
    text: &str,
) -> Result<String, ResolveError> {
    match resolver {
        Some(resolver) => resolver.resolve(user, text),
        None => Ok(text.to_string()),
    }
}

/// Resolved and translated title.
pub fn render_title(
    resolver: Option<&dyn TemplateResolver>,
    user: &SessionUser,
    template: &str,
) -> Result<String, ResolveError> {
    resolve(resolver, user, template).map(|title| translate_markup(&title))
}

/// Renders every configured line for `user`, top to bottom.
///
/// A line whose placeholders fail to resolve is shown as its raw template.
pub fn render_lines(
    resolver: Option<&dyn TemplateResolver>,
    user: &SessionUser,
    templates: &[String],
) -> Vec<String> {
    let mut used = HashSet::with_capacity(templates.len());
    let mut lines = Vec::with_capacity(templates.len());

    for template in templates {
        let resolved = resolve(resolver, user, template).unwrap_or_else(|e| {
            debug!("Placeholder resolution failed for {}: {}", user.id, e);
            template.clone()
        });
        let unique = make_unique(translate_markup(&resolved), &used);
        used.insert(unique.clone());
        lines.push(truncate_entry(&unique));
    }

    lines
}

/// Appends reset markers until `line` is not in `used`.
pub fn make_unique(line: String, used: &HashSet<String>) -> String {
    let mut unique = line;
    while used.contains(&unique) {
        unique.push_str(RESET_MARKER);
    }
    unique
}

/// Replaces every entry on `surface` with `lines`, first line ranked highest.
///
/// Entries the surface refuses are skipped. Returns how many were written.
pub fn apply_lines(surface: &mut dyn Surface, lines: &[String]) -> usize {
    for entry in surface.entries() {
        surface.reset_scores(&entry);
    }

    let mut written = 0;
    for (rank, line) in (1..=lines.len() as i32).rev().zip(lines) {
        match surface.set_rank(line, rank) {
            Ok(()) => written += 1,
            Err(e) => debug!("Skipping sidebar entry {:?}: {}", line, e),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::PlaceholderResolver;
    use crate::surface::{MemoryHost, SurfaceHost};
    use shared::UserId;

    fn user() -> SessionUser {
        SessionUser::new("u1", "Steve", "world")
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pass_through_without_resolver() {
        let rendered = render_lines(None, &user(), &lines(&["&a%player_name%"]));
        assert_eq!(rendered, vec!["§a%player_name%".to_string()]);
    }

    #[test]
    fn test_resolves_and_translates() {
        let mut resolver = PlaceholderResolver::new();
        resolver.register("player_name", |u| Ok(u.name.clone()));

        let rendered = render_lines(Some(&resolver), &user(), &lines(&["&7Hi &f%player_name%"]));
        assert_eq!(rendered, vec!["§7Hi §fSteve".to_string()]);

        let title = render_title(Some(&resolver), &user(), "&6%player_name%").unwrap();
        assert_eq!(title, "§6Steve");
    }

    #[test]
    fn test_failed_line_falls_back_to_template() {
        let mut resolver = PlaceholderResolver::new();
        resolver.register("eco", |_| Err(ResolveError::Unavailable));

        let rendered = render_lines(Some(&resolver), &user(), &lines(&["&e%eco%"]));
        assert_eq!(rendered, vec!["§e%eco%".to_string()]);
    }

    #[test]
    fn test_blank_lines_become_unique() {
        let rendered = render_lines(None, &user(), &lines(&["", "", "X"]));

        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[0], "");
        assert_eq!(rendered[1], RESET_MARKER);
        assert_eq!(rendered[2], "X");

        let distinct: HashSet<&String> = rendered.iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_repeated_duplicates_stack_markers() {
        let rendered = render_lines(None, &user(), &lines(&["a", "a", "a"]));
        assert_eq!(rendered[2], format!("a{}{}", RESET_MARKER, RESET_MARKER));
    }

    #[test]
    fn test_truncates_to_forty_characters() {
        let long = "x".repeat(50);
        let rendered = render_lines(None, &user(), &[long]);
        assert_eq!(rendered[0], "x".repeat(40));
    }

    #[test]
    fn test_truncation_can_swallow_marker() {
        let long = "y".repeat(40);
        let rendered = render_lines(None, &user(), &[long.clone(), long.clone()]);
        // The suffix that made the second line unique is cut off again.
        assert_eq!(rendered[0], long);
        assert_eq!(rendered[1], long);
    }

    #[test]
    fn test_apply_lines_ranks_descending() {
        let host = MemoryHost::new();
        let mut surface = host.create_surface(&UserId::new("u1"));

        let written = apply_lines(surface.as_mut(), &lines(&["A", "B", "C"]));
        assert_eq!(written, 3);

        let snapshot = host.snapshot(surface.id()).unwrap();
        assert_eq!(
            snapshot.entries,
            vec![
                ("A".to_string(), 3),
                ("B".to_string(), 2),
                ("C".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_apply_lines_clears_stale_entries() {
        let host = MemoryHost::new();
        let mut surface = host.create_surface(&UserId::new("u1"));

        apply_lines(surface.as_mut(), &lines(&["old", "gone"]));
        apply_lines(surface.as_mut(), &lines(&["new"]));

        assert_eq!(surface.entries(), vec!["new".to_string()]);
    }

    #[test]
    fn test_apply_lines_skips_rejected_entries() {
        let host = MemoryHost::new();
        host.reject_entries_containing("bad");
        let mut surface = host.create_surface(&UserId::new("u1"));

        let written = apply_lines(surface.as_mut(), &lines(&["A", "bad", "C"]));
        assert_eq!(written, 2);

        let snapshot = host.snapshot(surface.id()).unwrap();
        assert_eq!(
            snapshot.entries,
            vec![("A".to_string(), 3), ("C".to_string(), 1)]
        );
    }
}
