//! The 189 index: a two-sided score over a pair of opposing malay prices. A value at or near 189
//! means the book's margin on that pair is close to zero.

use crate::odds::{opposite_line, round2};
use crate::types::{MarketKind, QuoteBook, Side};

pub const INDEX_189: f64 = 189.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarginIndex {
    pub spread: Option<f64>,
    pub is_spread_189: bool,
    pub total: Option<f64>,
    pub is_total_189: bool,
}

/// Index of two opposing prices, rounded to two decimals.
pub fn pair_index(a: f64, b: f64) -> f64 {
    let raw = if a * b > 0.0 {
        (a + b) * 100.0
    } else {
        (2.0 - (a.abs() - b.abs()).abs()) * 100.0
    };
    round2(raw)
}

/// Match-level indexes from the designated source's filtered quotes.
pub fn margin_index(book: &QuoteBook) -> MarginIndex {
    let spread = book
        .spreads
        .iter()
        .filter_map(|(line, l)| {
            let home = l.home?;
            let away = book.spreads.get(&opposite_line(line)?)?.away?;
            Some(pair_index(home, away))
        })
        .fold(None, max_opt);

    let total = book
        .totals
        .values()
        .filter_map(|l| Some(pair_index(l.over?, l.under?)))
        .fold(None, max_opt);

    MarginIndex {
        spread,
        is_spread_189: spread == Some(INDEX_189),
        total,
        is_total_189: total == Some(INDEX_189),
    }
}

fn max_opt(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.max(v)))
}

/// Index of one (line, side) against its counterpart.
///
/// Spread sides pair with the opposite side at the opposite line. Total sides pair with the
/// opposite side at the same line. A zero price counts as missing.
pub fn line_index(book: &QuoteBook, market: MarketKind, line: &str, side: Side) -> Option<f64> {
    if side.market() != market {
        return None;
    }
    let current = book.price(market, line, side).filter(|p| *p != 0.0)?;
    let counterpart = match market {
        // opposite_line("0") is "0", so line 0 reads the same line.
        MarketKind::Spread => book.price(market, &opposite_line(line)?, side.opposite()),
        MarketKind::Total => book.price(market, line, side.opposite()),
    };
    let counterpart = counterpart.filter(|p| *p != 0.0)?;
    Some(pair_index(current, counterpart))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worked_example_flags_189() {
        let mut book = QuoteBook::default();
        book.insert(MarketKind::Spread, "-0.5", Side::Home, 0.94);
        book.insert(MarketKind::Spread, "0.5", Side::Away, -1.05);

        let idx = margin_index(&book);
        assert_eq!(idx.spread, Some(189.0));
        assert!(idx.is_spread_189);
        assert_eq!(idx.total, None);
        assert!(!idx.is_total_189);
    }

    #[test]
    fn takes_maximum_over_pairs() {
        let mut book = QuoteBook::default();
        book.insert(MarketKind::Total, "2.5", Side::Over, 0.9);
        book.insert(MarketKind::Total, "2.5", Side::Under, 0.9);
        book.insert(MarketKind::Total, "3", Side::Over, 0.8);
        book.insert(MarketKind::Total, "3", Side::Under, -0.95);
        // 3: (2 - |0.8 - 0.95|) * 100 = 185
        let idx = margin_index(&book);
        assert_eq!(idx.total, Some(185.0));
        assert!(!idx.is_total_189);
    }

    #[test]
    fn same_sign_pairs_sum() {
        assert_eq!(pair_index(0.9, 0.9), 180.0);
        assert_eq!(pair_index(-0.95, -0.94), -189.0);
    }

    #[test]
    fn per_line_index_pairs_opposite_line() {
        let mut book = QuoteBook::default();
        book.insert(MarketKind::Spread, "-1", Side::Home, 0.75);
        book.insert(MarketKind::Spread, "1", Side::Away, -1.05);
        book.insert(MarketKind::Spread, "0", Side::Home, 0.9);
        book.insert(MarketKind::Spread, "0", Side::Away, 0.0);

        assert_eq!(line_index(&book, MarketKind::Spread, "-1", Side::Home), Some(170.0));
        assert_eq!(line_index(&book, MarketKind::Spread, "1", Side::Away), Some(170.0));
        assert_eq!(line_index(&book, MarketKind::Spread, "0", Side::Home), None);
        assert_eq!(line_index(&book, MarketKind::Spread, "-1", Side::Over), None);
    }
}
