/*!
 * Stage transition table.
 *
 * Forward moves are listed explicitly per status; `Failed` is reachable from
 * every non-terminal status and nothing leaves a terminal one.
 */

use std::collections::{HashMap, VecDeque};

use crate::database::models::JobStatus;

// @returns: Statuses directly reachable from `from`, excluding Failed
pub fn forward_transitions(from: JobStatus) -> &'static [JobStatus] {
    use JobStatus::*;
    match from {
        Pending => &[FetchingMetadata],
        FetchingMetadata => &[DownloadingVideo],
        DownloadingVideo => &[DownloadingSubtitles],
        DownloadingSubtitles => &[ParsingSubtitles],
        ParsingSubtitles => &[Transcribing, Translating],
        Transcribing => &[Translating],
        Translating => &[GeneratingOutline, ExtractingFrames],
        GeneratingOutline => &[ExtractingFrames],
        ExtractingFrames => &[OptimizingImages],
        OptimizingImages => &[BuildingSlides],
        BuildingSlides => &[Completed],
        Completed | Failed => &[],
    }
}

/// Whether the table allows moving from `from` to `to` in one step
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    if from.is_terminal() {
        return false;
    }
    to == JobStatus::Failed || forward_transitions(from).contains(&to)
}

/// Shortest chain of single-step transitions leading from `from` to `to`,
/// excluding `from` itself. Empty when `from == to`, `None` when unreachable.
pub fn path_to(from: JobStatus, to: JobStatus) -> Option<Vec<JobStatus>> {
    if from == to {
        return Some(Vec::new());
    }

    let mut previous: HashMap<JobStatus, JobStatus> = HashMap::new();
    let mut queue = VecDeque::from([from]);

    while let Some(current) = queue.pop_front() {
        for &next in forward_transitions(current) {
            if next == from || previous.contains_key(&next) {
                continue;
            }
            previous.insert(next, current);
            if next == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(&before) = previous.get(&cursor) {
                    if before == from {
                        break;
                    }
                    path.push(before);
                    cursor = before;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(next);
        }
    }

    if can_transition(from, to) {
        return Some(vec![to]);
    }
    None
}
