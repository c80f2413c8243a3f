use std::collections::BTreeSet;

use crate::types::{MarketKind, QuoteBook, Side};

/// The (market, line, side) tuples priced by every required source in the current cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonOddsSet {
    entries: BTreeSet<(MarketKind, String, Side)>,
}

impl CommonOddsSet {
    /// Intersects the priced tuples of `books`. No books means an empty set.
    pub fn from_books<'a, I>(books: I) -> Self
    where
        I: IntoIterator<Item = &'a QuoteBook>,
    {
        let mut books = books.into_iter();
        let Some(first) = books.next() else {
            return Self::default();
        };
        let mut entries: BTreeSet<(MarketKind, String, Side)> = first
            .quotes()
            .into_iter()
            .map(|q| (q.market, q.line, q.side))
            .collect();
        for book in books {
            entries.retain(|(market, line, side)| book.price(*market, line, *side).is_some());
        }
        Self { entries }
    }

    pub fn contains(&self, market: MarketKind, line: &str, side: Side) -> bool {
        self.entries.contains(&(market, line.to_string(), side))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(MarketKind, String, Side)> {
        self.entries.iter()
    }

    /// `book` restricted to the common tuples.
    pub fn filter(&self, book: &QuoteBook) -> QuoteBook {
        book.filtered(|market, line, side| self.contains(market, line, side))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(entries: &[(MarketKind, &str, Side, f64)]) -> QuoteBook {
        let mut b = QuoteBook::default();
        for (m, l, s, p) in entries {
            b.insert(*m, l, *s, *p);
        }
        b
    }

    #[test]
    fn keeps_only_tuples_priced_everywhere() {
        let a = book(&[
            (MarketKind::Spread, "-0.5", Side::Home, 0.94),
            (MarketKind::Spread, "0.5", Side::Away, -1.05),
            (MarketKind::Total, "2.5", Side::Over, 0.9),
            (MarketKind::Total, "2.5", Side::Under, 0.9),
        ]);
        let b = book(&[
            (MarketKind::Spread, "-0.5", Side::Home, 0.92),
            (MarketKind::Total, "2.5", Side::Over, 0.88),
            (MarketKind::Total, "3", Side::Under, 0.8),
        ]);

        let common = CommonOddsSet::from_books([&a, &b]);
        assert_eq!(common.len(), 2);
        assert!(common.contains(MarketKind::Spread, "-0.5", Side::Home));
        assert!(common.contains(MarketKind::Total, "2.5", Side::Over));
        for (market, line, side) in common.iter() {
            assert!(a.price(*market, line, *side).is_some());
            assert!(b.price(*market, line, *side).is_some());
        }

        let filtered = common.filter(&a);
        assert_eq!(filtered.quotes().len(), 2);
        assert!(filtered.spreads.get("0.5").is_none());
        assert_eq!(filtered.totals["2.5"].under, None);
    }

    #[test]
    fn empty_when_no_books() {
        let books: Vec<QuoteBook> = Vec::new();
        assert!(CommonOddsSet::from_books(&books).is_empty());
    }
}
