use crate::config::CounterMode;
use crate::grouper::{FileGroup, GroupId};
use std::collections::HashMap;

pub const UNKNOWN_DATE_BUCKET: &str = "unknown";
pub const GLOBAL_BUCKET: &str = "all_files";
pub const CONTINUOUS_BUCKET: &str = "continuous";

/// Assigns one-based sequence numbers to chronologically sorted groups.
///
/// `dates` maps each group to its resolved `YYYYMMDD` date; it only matters
/// in [`CounterMode::DateReset`].
pub fn allocate(
    sorted_groups: &[FileGroup],
    dates: &HashMap<GroupId, Option<String>>,
    mode: CounterMode,
) -> HashMap<GroupId, u32> {
    let mut next: HashMap<String, u32> = HashMap::new();
    let mut assigned = HashMap::with_capacity(sorted_groups.len());

    for group in sorted_groups {
        let bucket = match mode {
            CounterMode::DateReset => dates
                .get(&group.id)
                .and_then(|d| d.clone())
                .unwrap_or_else(|| UNKNOWN_DATE_BUCKET.to_string()),
            CounterMode::Global => GLOBAL_BUCKET.to_string(),
            CounterMode::Continuous => CONTINUOUS_BUCKET.to_string(),
        };
        let counter = next.entry(bucket).or_insert(0);
        *counter += 1;
        assigned.insert(group.id, *counter);
    }

    assigned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouper::group_files;
    use std::path::PathBuf;

    fn five_groups() -> (Vec<FileGroup>, HashMap<GroupId, Option<String>>) {
        let files: Vec<PathBuf> = (1..=5)
            .map(|i| PathBuf::from(format!("/shoot/IMG_000{}.JPG", i)))
            .collect();
        let groups = group_files(&files);
        let dates = groups
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let date = if i < 3 { "20240601" } else { "20240602" };
                (g.id, Some(date.to_string()))
            })
            .collect();
        (groups, dates)
    }

    fn counters(groups: &[FileGroup], assigned: &HashMap<GroupId, u32>) -> Vec<u32> {
        groups.iter().map(|g| assigned[&g.id]).collect()
    }

    #[test]
    fn date_reset_restarts_each_day() {
        let (groups, dates) = five_groups();
        let assigned = allocate(&groups, &dates, CounterMode::DateReset);
        assert_eq!(counters(&groups, &assigned), vec![1, 2, 3, 1, 2]);
    }

    #[test]
    fn continuous_runs_across_days() {
        let (groups, dates) = five_groups();
        let assigned = allocate(&groups, &dates, CounterMode::Continuous);
        assert_eq!(counters(&groups, &assigned), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn global_mode_ignores_dates() {
        let (groups, _) = five_groups();
        let assigned = allocate(&groups, &HashMap::new(), CounterMode::Global);
        assert_eq!(counters(&groups, &assigned), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn undated_groups_share_the_unknown_bucket() {
        let (groups, mut dates) = five_groups();
        dates.insert(groups[1].id, None);
        dates.remove(&groups[4].id);
        let assigned = allocate(&groups, &dates, CounterMode::DateReset);
        assert_eq!(counters(&groups, &assigned), vec![1, 1, 2, 1, 2]);
    }
}
