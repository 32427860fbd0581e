//! Per-block statistics checks
//!
//! This module handles:
//! - The set of statistics `getblockstats` reports and parsing a selection
//! - Consistency checks over a report spanning a height range
//! - A small scenario that queries a node and checks what comes back

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::rpc::NodeRpc;
use crate::{HarnessError, Result};

/// Block subsidy at height zero, in satoshis
pub const INITIAL_SUBSIDY_SAT: i64 = 5_000_000_000;

/// Halving interval on regtest
pub const REGTEST_HALVING_INTERVAL: i64 = 150;

macro_rules! block_stats {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// A statistic `getblockstats` can report
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum BlockStat {
            $($variant),+
        }

        impl BlockStat {
            /// Every statistic, in reporting order
            pub const ALL: &'static [BlockStat] = &[$(BlockStat::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(BlockStat::$variant => $name),+
                }
            }
        }

        impl FromStr for BlockStat {
            type Err = HarnessError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($name => Ok(BlockStat::$variant),)+
                    other => Err(HarnessError::InvalidSelectedStatistic(other.to_string())),
                }
            }
        }
    };
}

block_stats! {
    Height => "height",
    Time => "time",
    MedianTime => "mediantime",
    Txs => "txs",
    SwTxs => "swtxs",
    Ins => "ins",
    Outs => "outs",
    Subsidy => "subsidy",
    TotalFee => "totalfee",
    Reward => "reward",
    UtxoIncrease => "utxo_increase",
    UtxoSizeInc => "utxo_size_inc",
    TotalSize => "total_size",
    TotalWeight => "total_weight",
    SwTotalSize => "swtotal_size",
    SwTotalWeight => "swtotal_weight",
    TotalOut => "total_out",
    MinFee => "minfee",
    MaxFee => "maxfee",
    MedianFee => "medianfee",
    AvgFee => "avgfee",
    MinFeeRate => "minfeerate",
    MaxFeeRate => "maxfeerate",
    MedianFeeRate => "medianfeerate",
    AvgFeeRate => "avgfeerate",
    MinFeeRateOld => "minfeerate_old",
    MaxFeeRateOld => "maxfeerate_old",
    MedianFeeRateOld => "medianfeerate_old",
    AvgFeeRateOld => "avgfeerate_old",
}

impl fmt::Display for BlockStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a comma separated selection such as `"minfee,maxfee"`. The first
/// unknown name is the one reported.
pub fn parse_stat_selection(selection: &str) -> Result<Vec<BlockStat>> {
    let mut stats = Vec::new();
    for name in selection.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let stat: BlockStat = name.parse()?;
        if !stats.contains(&stat) {
            stats.push(stat);
        }
    }
    Ok(stats)
}

pub fn format_selection(stats: &[BlockStat]) -> String {
    stats.iter().map(BlockStat::as_str).collect::<Vec<_>>().join(",")
}

/// `getblockstats` result: one array per statistic, one entry per block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockStatsReport {
    stats: BTreeMap<String, Vec<i64>>,
}

impl BlockStatsReport {
    pub fn new(stats: BTreeMap<String, Vec<i64>>) -> Self {
        Self { stats }
    }

    pub fn get(&self, stat: BlockStat) -> Option<&[i64]> {
        self.stats.get(stat.as_str()).map(Vec::as_slice)
    }

    pub fn value(&self, stat: BlockStat, index: usize) -> Option<i64> {
        self.get(stat).and_then(|values| values.get(index).copied())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }

    /// Number of blocks covered
    pub fn len(&self) -> usize {
        self.stats.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Block subsidy at `height` in satoshis
pub fn subsidy(height: i64, halving_interval: i64) -> i64 {
    if halving_interval <= 0 {
        return INITIAL_SUBSIDY_SAT;
    }
    let halvings = height.max(0) / halving_interval;
    if halvings >= 64 {
        0
    } else {
        INITIAL_SUBSIDY_SAT >> halvings
    }
}

/// Check `report` covers consecutive heights from `start` and is internally
/// consistent. With a `selected` set, exactly those statistics must appear;
/// otherwise all of them.
pub fn check_report(
    report: &BlockStatsReport,
    start: i64,
    selected: Option<&[BlockStat]>,
    halving_interval: i64,
) -> Result<()> {
    let expected = selected.unwrap_or(BlockStat::ALL);
    for stat in expected {
        if report.get(*stat).is_none() {
            return Err(HarnessError::BlockStatsMissing(stat.to_string()));
        }
    }
    for name in report.names() {
        let known = name.parse::<BlockStat>().ok();
        if !known.is_some_and(|stat| expected.contains(&stat)) {
            return Err(HarnessError::BlockStatsUnexpected(name.to_string()));
        }
    }

    let blocks = report.len();
    for stat in expected {
        let len = report.get(*stat).map_or(0, <[i64]>::len);
        if len != blocks {
            return Err(HarnessError::BlockStatsInconsistent {
                height: start,
                detail: format!("{} has {} entries, expected {}", stat, len, blocks),
            });
        }
    }

    for index in 0..blocks {
        let height = start + index as i64;
        let inconsistent = |detail: String| HarnessError::BlockStatsInconsistent { height, detail };

        if let Some(reported) = report.value(BlockStat::Height, index) {
            if reported != height {
                return Err(inconsistent(format!("reported height {}", reported)));
            }
        }

        let expected_subsidy = subsidy(height, halving_interval);
        if let Some(reported) = report.value(BlockStat::Subsidy, index) {
            if reported != expected_subsidy {
                return Err(inconsistent(format!("subsidy {} != {}", reported, expected_subsidy)));
            }
        }
        if let (Some(reward), Some(total_fee)) = (
            report.value(BlockStat::Reward, index),
            report.value(BlockStat::TotalFee, index),
        ) {
            if reward != expected_subsidy + total_fee {
                return Err(inconsistent(format!(
                    "reward {} != subsidy {} + totalfee {}",
                    reward, expected_subsidy, total_fee
                )));
            }
        }

        let ordered = [
            (BlockStat::MinFee, BlockStat::MedianFee, BlockStat::MaxFee),
            (BlockStat::MinFee, BlockStat::AvgFee, BlockStat::MaxFee),
            (BlockStat::MinFeeRate, BlockStat::MedianFeeRate, BlockStat::MaxFeeRate),
            (BlockStat::MinFeeRate, BlockStat::AvgFeeRate, BlockStat::MaxFeeRate),
        ];
        for (low, mid, high) in ordered {
            if let (Some(l), Some(m), Some(h)) = (
                report.value(low, index),
                report.value(mid, index),
                report.value(high, index),
            ) {
                if !(l <= m && m <= h) {
                    return Err(inconsistent(format!("{} {} <= {} {} <= {} {} violated", low, l, mid, m, high, h)));
                }
            }
        }
    }
    Ok(())
}

/// Queries a height range and checks the result
pub struct BlockStatsScenario {
    pub start: i64,
    pub end: i64,
    pub selection: Option<Vec<BlockStat>>,
    pub halving_interval: i64,
}

impl BlockStatsScenario {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            selection: None,
            halving_interval: REGTEST_HALVING_INTERVAL,
        }
    }

    pub fn with_selection(mut self, selection: Vec<BlockStat>) -> Self {
        self.selection = Some(selection);
        self
    }

    pub async fn run(&self, node: &dyn NodeRpc) -> Result<BlockStatsReport> {
        if self.start > self.end {
            return Err(HarnessError::Config(format!(
                "Start block height {} higher than end {}",
                self.start, self.end
            )));
        }
        let selection = self.selection.as_deref();
        let report = node.get_block_stats(self.start, self.end, selection).await?;
        check_report(&report, self.start, selection, self.halving_interval)?;
        info!(
            "Block stats for heights {}..={} from {} consistent ({} statistics)",
            self.start,
            self.end,
            node.name(),
            report.names().count()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_report(start: i64, total_fees: &[i64]) -> BlockStatsReport {
        let mut stats = BTreeMap::new();
        for stat in BlockStat::ALL {
            stats.insert(stat.as_str().to_string(), vec![0; total_fees.len()]);
        }
        let heights: Vec<i64> = (0..total_fees.len() as i64).map(|i| start + i).collect();
        let subsidies: Vec<i64> = heights.iter().map(|h| subsidy(*h, REGTEST_HALVING_INTERVAL)).collect();
        let rewards: Vec<i64> = subsidies.iter().zip(total_fees).map(|(s, f)| s + f).collect();
        stats.insert("height".to_string(), heights);
        stats.insert("subsidy".to_string(), subsidies);
        stats.insert("totalfee".to_string(), total_fees.to_vec());
        stats.insert("reward".to_string(), rewards);
        BlockStatsReport::new(stats)
    }

    #[test]
    fn test_all_statistics_listed() {
        assert_eq!(BlockStat::ALL.len(), 29);
        for stat in BlockStat::ALL {
            assert_eq!(stat.as_str().parse::<BlockStat>().unwrap(), *stat);
        }
    }

    #[test]
    fn test_selection_reports_first_invalid_name() {
        for selection in ["minfee,asdfghjkl", "asdfghjkl,minfee", "minfee,asdfghjkl,maxfee"] {
            let err = parse_stat_selection(selection).unwrap_err();
            assert_eq!(err.to_string(), "Invalid selected statistic asdfghjkl");
        }
        let err = parse_stat_selection("minfee,aaaasdfghjkl").unwrap_err();
        assert_eq!(err.to_string(), "Invalid selected statistic aaaasdfghjkl");
    }

    #[test]
    fn test_selection_round_trip() {
        let stats = parse_stat_selection("minfee,maxfee").unwrap();
        assert_eq!(stats, vec![BlockStat::MinFee, BlockStat::MaxFee]);
        assert_eq!(format_selection(&stats), "minfee,maxfee");
    }

    #[test]
    fn test_subsidy_halves() {
        assert_eq!(subsidy(0, 150), 5_000_000_000);
        assert_eq!(subsidy(149, 150), 5_000_000_000);
        assert_eq!(subsidy(150, 150), 2_500_000_000);
        assert_eq!(subsidy(150 * 64, 150), 0);
        assert_eq!(subsidy(210_000, 210_000), 2_500_000_000);
    }

    #[test]
    fn test_check_full_report() {
        let mut report = full_report(101, &[0, 3840, 76160]);
        check_report(&report, 101, None, REGTEST_HALVING_INTERVAL).unwrap();

        report.stats.insert("minfee".to_string(), vec![0, 3840, 3840]);
        report.stats.insert("medianfee".to_string(), vec![0, 3840, 4520]);
        report.stats.insert("avgfee".to_string(), vec![0, 3840, 25386]);
        report.stats.insert("maxfee".to_string(), vec![0, 3840, 67800]);
        check_report(&report, 101, None, REGTEST_HALVING_INTERVAL).unwrap();
    }

    #[test]
    fn test_check_detects_bad_reward() {
        let mut report = full_report(101, &[0, 3840]);
        report.stats.insert("reward".to_string(), vec![5_000_000_000, 5_000_000_000]);
        assert!(matches!(
            check_report(&report, 101, None, REGTEST_HALVING_INTERVAL),
            Err(HarnessError::BlockStatsInconsistent { height: 102, .. })
        ));
    }

    #[test]
    fn test_check_detects_height_gap() {
        let report = full_report(101, &[0, 0]);
        assert!(matches!(
            check_report(&report, 100, None, REGTEST_HALVING_INTERVAL),
            Err(HarnessError::BlockStatsInconsistent { height: 100, .. })
        ));
    }

    #[test]
    fn test_check_detects_unordered_fee_rates() {
        let mut report = full_report(101, &[0]);
        report.stats.insert("minfeerate".to_string(), vec![30]);
        report.stats.insert("medianfeerate".to_string(), vec![20]);
        report.stats.insert("maxfeerate".to_string(), vec![40]);
        assert!(check_report(&report, 101, None, REGTEST_HALVING_INTERVAL).is_err());
    }

    #[test]
    fn test_check_selection_membership() {
        let selected = [BlockStat::MinFee, BlockStat::MaxFee];
        let mut stats = BTreeMap::new();
        stats.insert("minfee".to_string(), vec![0, 10]);
        stats.insert("maxfee".to_string(), vec![0, 20]);
        let report = BlockStatsReport::new(stats.clone());
        check_report(&report, 1, Some(&selected), REGTEST_HALVING_INTERVAL).unwrap();

        stats.insert("avgfee".to_string(), vec![0, 15]);
        let report = BlockStatsReport::new(stats);
        assert!(matches!(
            check_report(&report, 1, Some(&selected), REGTEST_HALVING_INTERVAL),
            Err(HarnessError::BlockStatsUnexpected(name)) if name == "avgfee"
        ));

        let full = full_report(1, &[0]);
        let mut missing = full.stats.clone();
        missing.remove("txs");
        assert!(matches!(
            check_report(&BlockStatsReport::new(missing), 1, None, REGTEST_HALVING_INTERVAL),
            Err(HarnessError::BlockStatsMissing(name)) if name == "txs"
        ));
    }

    #[test]
    fn test_check_detects_ragged_arrays() {
        let mut report = full_report(1, &[0, 0]);
        report.stats.insert("txs".to_string(), vec![1]);
        assert!(matches!(
            check_report(&report, 1, None, REGTEST_HALVING_INTERVAL),
            Err(HarnessError::BlockStatsInconsistent { .. })
        ));
    }

    #[test]
    fn test_report_deserializes_from_rpc_result() {
        let report: BlockStatsReport =
            serde_json::from_value(serde_json::json!({"minfee": [0, 3840], "maxfee": [0, 3840]})).unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report.value(BlockStat::MaxFee, 1), Some(3840));
        assert_eq!(report.get(BlockStat::Txs), None);
    }
}
