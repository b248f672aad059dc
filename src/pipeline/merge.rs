//! Cross-segment deduplication.
//!
//! Segments are drawn by hand and often share a border, so the same
//! physical field can come back from two or more segments with slightly
//! different boxes, labels and confidences. Two detections are the same
//! field iff they sit on the same page and their IoU reaches the threshold.
//! Duplicates are clustered with a disjoint-set forest (so A≈B and B≈C puts
//! all three together even when A and C barely touch) and one representative
//! survives per cluster.

use crate::geometry::calculate_iou;
use crate::output::DetectedField;

/// IoU at or above which two detections are considered the same field.
pub const MERGE_IOU_THRESHOLD: f64 = 0.5;

/// Disjoint-set forest over `0..n` with path compression and union by rank.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Whether `candidate` should replace `current` as cluster representative.
///
/// Higher confidence wins and any confidence beats none. Ties keep
/// `current`, which is always the earlier field in segment order.
fn outranks(candidate: &DetectedField, current: &DetectedField) -> bool {
    match (candidate.confidence, current.confidence) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Merge per-segment field lists into one deduplicated list.
///
/// Input order is segment order. The output holds one field per cluster, in
/// the order each cluster's first member appeared; singletons pass through
/// unchanged.
pub fn merge_detected_fields_across_segments(
    per_segment: Vec<Vec<DetectedField>>,
    iou_threshold: f64,
) -> Vec<DetectedField> {
    let fields: Vec<DetectedField> = per_segment.into_iter().flatten().collect();
    let n = fields.len();
    if n < 2 {
        return fields;
    }

    let mut uf = UnionFind::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            let (a, b) = (&fields[i], &fields[j]);
            if a.page_index == b.page_index
                && calculate_iou(&a.bbox_normalized, &b.bbox_normalized) >= iou_threshold
            {
                uf.union(i, j);
            }
        }
    }

    // One representative per cluster, clusters in order of first member.
    let mut reps: Vec<usize> = Vec::new();
    let mut slot_of_root: Vec<Option<usize>> = vec![None; n];

    for i in 0..n {
        let root = uf.find(i);
        match slot_of_root[root] {
            None => {
                slot_of_root[root] = Some(reps.len());
                reps.push(i);
            }
            Some(slot) => {
                if outranks(&fields[i], &fields[reps[slot]]) {
                    reps[slot] = i;
                }
            }
        }
    }

    let mut by_index: Vec<Option<DetectedField>> = fields.into_iter().map(Some).collect();
    reps.iter().filter_map(|&rep| by_index[rep].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NormalizedBBox;
    use crate::output::FieldType;

    fn field(name: &str, page: usize, x: f64, y: f64, w: f64, h: f64, c: Option<f64>) -> DetectedField {
        DetectedField {
            name: name.into(),
            label: name.into(),
            field_type: FieldType::Text,
            bbox_normalized: NormalizedBBox::new(x, y, w, h),
            page_index: page,
            confidence: c,
        }
    }

    #[test]
    fn overlapping_segments_yield_three_fields() {
        let a = vec![
            field("a1", 0, 0.1, 0.1, 0.2, 0.05, None),
            field("a2", 0, 0.5, 0.5, 0.1, 0.1, None),
        ];
        let b = vec![
            field("b1", 0, 0.11, 0.1, 0.2, 0.05, None),
            field("b2", 0, 0.9, 0.9, 0.05, 0.05, None),
        ];
        let merged = merge_detected_fields_across_segments(vec![a, b], MERGE_IOU_THRESHOLD);
        let names: Vec<&str> = merged.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a1", "a2", "b2"]);
    }

    #[test]
    fn highest_confidence_wins() {
        let a = vec![field("a", 0, 0.1, 0.1, 0.2, 0.05, Some(0.6))];
        let b = vec![field("b", 0, 0.1, 0.1, 0.2, 0.05, Some(0.9))];
        let merged = merge_detected_fields_across_segments(vec![a, b], MERGE_IOU_THRESHOLD);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "b");
    }

    #[test]
    fn present_confidence_beats_absent() {
        let a = vec![field("a", 0, 0.1, 0.1, 0.2, 0.05, None)];
        let b = vec![field("b", 0, 0.1, 0.1, 0.2, 0.05, Some(0.1))];
        let merged = merge_detected_fields_across_segments(vec![a, b], MERGE_IOU_THRESHOLD);
        assert_eq!(merged[0].name, "b");
    }

    #[test]
    fn equal_confidence_keeps_first_seen() {
        let a = vec![field("a", 0, 0.1, 0.1, 0.2, 0.05, Some(0.8))];
        let b = vec![field("b", 0, 0.1, 0.1, 0.2, 0.05, Some(0.8))];
        let merged = merge_detected_fields_across_segments(vec![a, b], MERGE_IOU_THRESHOLD);
        assert_eq!(merged[0].name, "a");
    }

    #[test]
    fn different_pages_never_merge() {
        let a = vec![field("a", 0, 0.1, 0.1, 0.2, 0.05, None)];
        let b = vec![field("b", 1, 0.1, 0.1, 0.2, 0.05, None)];
        let merged = merge_detected_fields_across_segments(vec![a, b], MERGE_IOU_THRESHOLD);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn clusters_are_transitive() {
        // a≈b and b≈c, but a and c alone fall below the threshold.
        let a = field("a", 0, 0.00, 0.0, 0.30, 0.1, None);
        let b = field("b", 0, 0.06, 0.0, 0.30, 0.1, Some(0.7));
        let c = field("c", 0, 0.12, 0.0, 0.30, 0.1, None);
        assert!(calculate_iou(&a.bbox_normalized, &c.bbox_normalized) < MERGE_IOU_THRESHOLD);
        assert!(calculate_iou(&a.bbox_normalized, &b.bbox_normalized) >= MERGE_IOU_THRESHOLD);
        assert!(calculate_iou(&b.bbox_normalized, &c.bbox_normalized) >= MERGE_IOU_THRESHOLD);

        let merged = merge_detected_fields_across_segments(vec![vec![a], vec![b], vec![c]], 0.5);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "b");
    }

    #[test]
    fn output_is_never_longer_than_input() {
        let merged = merge_detected_fields_across_segments(vec![vec![], vec![]], 0.5);
        assert!(merged.is_empty());
        let single = vec![vec![field("x", 0, 0.0, 0.0, 0.1, 0.1, None)]];
        assert_eq!(merge_detected_fields_across_segments(single, 0.5).len(), 1);
    }
}
