use super::KnowledgeSnippet;

/// Order by relevance descending, then source priority, then the position
/// the source returned the snippet in.
pub(crate) fn rank(batches: Vec<(usize, Vec<KnowledgeSnippet>)>) -> Vec<KnowledgeSnippet> {
    let mut keyed: Vec<(usize, usize, KnowledgeSnippet)> = batches
        .into_iter()
        .flat_map(|(priority, snippets)| {
            snippets
                .into_iter()
                .enumerate()
                .map(move |(position, snippet)| (priority, position, snippet))
        })
        .collect();

    keyed.sort_by(|a, b| {
        b.2.relevance
            .total_cmp(&a.2.relevance)
            .then(a.0.cmp(&b.0))
            .then(a.1.cmp(&b.1))
    });
    keyed.into_iter().map(|(_, _, snippet)| snippet).collect()
}

/// Drop lowest-ranked snippets until the total text fits in `max_chars`.
/// Returns the kept snippets and how many were dropped.
pub(crate) fn truncate(
    mut ranked: Vec<KnowledgeSnippet>,
    max_chars: usize,
) -> (Vec<KnowledgeSnippet>, usize) {
    let mut total: usize = ranked.iter().map(KnowledgeSnippet::char_len).sum();
    let mut dropped = 0;
    while total > max_chars {
        match ranked.pop() {
            Some(snippet) => {
                total -= snippet.char_len();
                dropped += 1;
            }
            None => break,
        }
    }
    (ranked, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn snip(source: &str, text: &str, relevance: f32) -> KnowledgeSnippet {
        KnowledgeSnippet::new(source, text, relevance)
    }

    #[test]
    fn ties_break_on_priority_then_position() {
        let ranked = rank(vec![
            (1, vec![snip("vector", "v0", 0.5), snip("vector", "v1", 0.9)]),
            (0, vec![snip("graph", "g0", 0.5), snip("graph", "g1", 0.5)]),
        ]);
        let texts: Vec<&str> = ranked.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["v1", "g0", "g1", "v0"]);
    }

    #[test]
    fn truncate_drops_from_the_tail() {
        let ranked = vec![
            snip("a", "aaaa", 0.9),
            snip("b", "bbbb", 0.8),
            snip("c", "cccc", 0.1),
        ];
        let (kept, dropped) = truncate(ranked, 9);
        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].text, "bbbb");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let ranked = vec![snip("a", "éééé", 0.9)];
        let (kept, dropped) = truncate(ranked, 4);
        assert_eq!((kept.len(), dropped), (1, 0));
    }

    proptest! {
        #[test]
        fn rank_is_independent_of_batch_arrival_order(
            scores in proptest::collection::vec(
                proptest::collection::vec(0u8..=4, 0..5),
                1..5,
            ),
        ) {
            let batches: Vec<(usize, Vec<KnowledgeSnippet>)> = scores
                .iter()
                .enumerate()
                .map(|(p, s)| {
                    let snippets = s
                        .iter()
                        .enumerate()
                        .map(|(i, r)| snip(&format!("s{}", p), &format!("{}-{}", p, i), *r as f32 / 4.0))
                        .collect();
                    (p, snippets)
                })
                .collect();
            let mut reversed = batches.clone();
            reversed.reverse();

            let a = rank(batches);
            let b = rank(reversed);
            prop_assert_eq!(&a, &b);
            for pair in a.windows(2) {
                prop_assert!(pair[0].relevance >= pair[1].relevance);
            }
        }

        #[test]
        fn truncated_context_fits_cap(
            lens in proptest::collection::vec(0usize..50, 0..12),
            cap in 0usize..200,
        ) {
            let ranked: Vec<KnowledgeSnippet> = lens
                .iter()
                .map(|n| snip("s", &"x".repeat(*n), 0.5))
                .collect();
            let (kept, dropped) = truncate(ranked, cap);
            let total: usize = kept.iter().map(|s| s.char_len()).sum();
            prop_assert!(total <= cap);
            prop_assert_eq!(kept.len() + dropped, lens.len());
        }
    }
}
