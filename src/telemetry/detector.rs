//! 異常検知
//!
//! 統計的に厳密な検知ではなく、定期タスクから呼ばれる簡易スコアリング。

use crate::telemetry::metrics::MetricStats;
use serde::{Deserialize, Serialize};

/// 異常検知結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    /// 異常フラグ
    pub is_anomaly: bool,
    /// 異常スコア（0.0-1.0）
    pub score: f64,
    /// 理由
    pub reason: String,
}

impl AnomalyResult {
    fn normal(reason: &str) -> Self {
        Self {
            is_anomaly: false,
            score: 0.0,
            reason: reason.to_string(),
        }
    }
}

/// 異常検知器
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    /// Z-scoreの閾値
    zscore_threshold: f64,
    /// 判定に必要な最小サンプル数
    min_samples: usize,
}

impl AnomalyDetector {
    /// 新しい検知器を作成
    pub fn new() -> Self {
        Self {
            zscore_threshold: 3.0, // 3シグマルール
            min_samples: 5,
        }
    }

    /// Z-scoreの閾値を設定
    pub fn with_zscore_threshold(mut self, threshold: f64) -> Self {
        self.zscore_threshold = threshold;
        self
    }

    /// 最小サンプル数を設定
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Z-scoreベースの異常検知
    pub fn detect_zscore(&self, value: f64, stats: &MetricStats) -> AnomalyResult {
        if stats.count < self.min_samples {
            return AnomalyResult::normal("Insufficient data");
        }
        if stats.std_dev == 0.0 {
            return AnomalyResult::normal("Insufficient variance");
        }

        let zscore = ((value - stats.mean) / stats.std_dev).abs();
        let is_anomaly = zscore > self.zscore_threshold;

        AnomalyResult {
            is_anomaly,
            score: (zscore / self.zscore_threshold).min(1.0),
            reason: format!("Z-score: {:.2}", zscore),
        }
    }

    /// 移動平均ベースの異常検知
    ///
    /// `recent_values` は古い順。最新値を直前 `window_size` 件の平均と比較する。
    pub fn detect_moving_average(&self, recent_values: &[f64], window_size: usize) -> AnomalyResult {
        if window_size == 0 || recent_values.len() <= window_size {
            return AnomalyResult::normal("Insufficient data");
        }

        let (history, current) = recent_values.split_at(recent_values.len() - 1);
        let current = current[0];
        let ma: f64 = history.iter().rev().take(window_size).sum::<f64>() / window_size as f64;
        let deviation = (current - ma).abs();
        let relative_deviation = if ma != 0.0 { deviation / ma.abs() } else { 0.0 };

        let is_anomaly = relative_deviation > 0.5; // 50%以上の偏差

        AnomalyResult {
            is_anomaly,
            score: relative_deviation.min(1.0),
            reason: format!(
                "MA: {:.2}, Current: {:.2}, Deviation: {:.2}%",
                ma,
                current,
                relative_deviation * 100.0
            ),
        }
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zscore_detection() {
        let detector = AnomalyDetector::new();
        let stats = MetricStats::from_values(vec![10.0, 12.0, 11.0, 13.0, 12.0]);

        let result = detector.detect_zscore(12.0, &stats);
        assert!(!result.is_anomaly);

        let result = detector.detect_zscore(50.0, &stats);
        assert!(result.is_anomaly);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_zscore_needs_samples() {
        let detector = AnomalyDetector::new();
        let stats = MetricStats::from_values(vec![10.0, 100.0]);

        let result = detector.detect_zscore(1000.0, &stats);
        assert!(!result.is_anomaly);
        assert_eq!(result.reason, "Insufficient data");
    }

    #[test]
    fn test_flat_series_is_not_anomalous() {
        let detector = AnomalyDetector::new().with_min_samples(1);
        let stats = MetricStats::from_values(vec![5.0; 10]);

        let result = detector.detect_zscore(5.0, &stats);
        assert!(!result.is_anomaly);
        assert_eq!(result.reason, "Insufficient variance");
    }

    #[test]
    fn test_moving_average_detection() {
        let detector = AnomalyDetector::new();
        let values = vec![10.0, 11.0, 12.0, 11.0, 50.0];

        let result = detector.detect_moving_average(&values, 4);
        assert!(result.is_anomaly);

        let result = detector.detect_moving_average(&[10.0, 11.0, 12.0, 11.0, 12.0], 4);
        assert!(!result.is_anomaly);
    }
}
