//! Chain-length statistics, for diagnostics only.

use core::fmt;

/// Histogram width; chains at least this long share the last slot.
pub const STATS_VECTLEN: usize = 50;

#[derive(Clone, Debug, PartialEq)]
pub struct TableStats {
    pub size: usize,
    pub used: usize,
    /// Non-empty buckets.
    pub slots: usize,
    pub max_chain_len: usize,
    pub total_chain_len: usize,
    /// `histogram[n]` = buckets whose chain has `n` entries (`n == 0` counts
    /// empty buckets; the last slot collects every longer chain).
    pub histogram: [usize; STATS_VECTLEN],
}

impl TableStats {
    pub(crate) fn from_chain_lengths(
        size: usize,
        used: usize,
        lengths: impl Iterator<Item = usize>,
    ) -> Self {
        let mut stats = TableStats {
            size,
            used,
            slots: 0,
            max_chain_len: 0,
            total_chain_len: 0,
            histogram: [0; STATS_VECTLEN],
        };
        for len in lengths {
            stats.histogram[len.min(STATS_VECTLEN - 1)] += 1;
            if len == 0 {
                continue;
            }
            stats.slots += 1;
            stats.max_chain_len = stats.max_chain_len.max(len);
            stats.total_chain_len += len;
        }
        stats
    }

    pub fn load_factor(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.used as f64 / self.size as f64
        }
    }

    pub fn avg_chain_len(&self) -> f64 {
        if self.slots == 0 {
            0.0
        } else {
            self.total_chain_len as f64 / self.slots as f64
        }
    }
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.used == 0 {
            return writeln!(f, "No stats available for empty dictionaries");
        }
        writeln!(f, "Hash table stats:")?;
        writeln!(f, " table size: {}", self.size)?;
        writeln!(f, " number of elements: {}", self.used)?;
        writeln!(f, " different slots: {}", self.slots)?;
        writeln!(f, " max chain length: {}", self.max_chain_len)?;
        writeln!(f, " avg chain length (counted): {:.02}", self.avg_chain_len())?;
        writeln!(
            f,
            " avg chain length (computed): {:.02}",
            self.used as f64 / self.slots.max(1) as f64
        )?;
        writeln!(f, " load factor: {:.02}", self.load_factor())?;
        writeln!(f, " Chain length distribution:")?;
        for (len, &count) in self.histogram.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let prefix = if len == STATS_VECTLEN - 1 { ">= " } else { "" };
            writeln!(
                f,
                "   {}{}: {} ({:.02}%)",
                prefix,
                len,
                count,
                count as f64 / self.size as f64 * 100.0
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DictStats {
    pub main: TableStats,
    /// Present while a rehash is in progress.
    pub rehash_target: Option<TableStats>,
}

impl fmt::Display for DictStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.main)?;
        if let Some(target) = &self.rehash_target {
            writeln!(f, "-- Rehashing into ht[1]:")?;
            write!(f, "{}", target)?;
        }
        Ok(())
    }
}
