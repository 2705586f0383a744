//! Character diff between two strings.
//!
//! Produces a patch of `(Del | Eql | Ins, text)` runs: common prefix and
//! suffix are trimmed first, the middle is resolved with the O(ND) bisect
//! strategy. Offsets everywhere in this crate count `char`s, so the patch
//! text is plain `String` runs with no encoding bookkeeping.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOpType {
    Del,
    Eql,
    Ins,
}

pub type PatchOperation = (PatchOpType, String);
pub type Patch = Vec<PatchOperation>;

/// Merges adjacent same-kind runs and drops empty ones.
pub fn normalize(patch: Patch) -> Patch {
    let mut out: Patch = Vec::with_capacity(patch.len());
    for (kind, text) in patch {
        if text.is_empty() {
            continue;
        }
        if let Some(last) = out.last_mut() {
            if last.0 == kind {
                last.1.push_str(&text);
                continue;
            }
        }
        out.push((kind, text));
    }
    out
}

/// Length of the common `char` prefix.
pub fn common_prefix(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Length of the common `char` suffix.
pub fn common_suffix(a: &[char], b: &[char]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

fn collect(chars: &[char]) -> String {
    chars.iter().collect()
}

fn find_sub(hay: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > hay.len() {
        return None;
    }
    hay.windows(needle.len()).position(|w| w == needle)
}

fn diff_no_common_affix(a: &[char], b: &[char]) -> Patch {
    if a.is_empty() {
        return vec![(PatchOpType::Ins, collect(b))];
    }
    if b.is_empty() {
        return vec![(PatchOpType::Del, collect(a))];
    }

    let (long, short, src_longer) = if a.len() > b.len() {
        (a, b, true)
    } else {
        (b, a, false)
    };
    if let Some(index) = find_sub(long, short) {
        let start = collect(&long[..index]);
        let end = collect(&long[index + short.len()..]);
        let kind = if src_longer {
            PatchOpType::Del
        } else {
            PatchOpType::Ins
        };
        return vec![
            (kind, start),
            (PatchOpType::Eql, collect(short)),
            (kind, end),
        ];
    }

    if short.len() == 1 {
        return vec![
            (PatchOpType::Del, collect(a)),
            (PatchOpType::Ins, collect(b)),
        ];
    }

    bisect(a, b)
}

fn diff_slices(a: &[char], b: &[char]) -> Patch {
    if a == b {
        if a.is_empty() {
            return vec![];
        }
        return vec![(PatchOpType::Eql, collect(a))];
    }

    let prefix = common_prefix(a, b);
    let suffix = common_suffix(&a[prefix..], &b[prefix..]);
    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    let mut patch = Patch::new();
    if prefix > 0 {
        patch.push((PatchOpType::Eql, collect(&a[..prefix])));
    }
    patch.extend(diff_no_common_affix(a_mid, b_mid));
    if suffix > 0 {
        patch.push((PatchOpType::Eql, collect(&a[a.len() - suffix..])));
    }
    patch
}

fn bisect_split(a: &[char], b: &[char], x: usize, y: usize) -> Patch {
    let mut patch = diff_slices(&a[..x], &b[..y]);
    patch.extend(diff_slices(&a[x..], &b[y..]));
    patch
}

/// Myers bisect: find a middle overlap of forward and reverse d-paths, then
/// recurse on both halves.
fn bisect(a: &[char], b: &[char]) -> Patch {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max_d = (n + m + 1) / 2;
    let v_offset = max_d;
    let v_length = (2 * max_d + 2) as usize;
    let mut v1 = vec![-1isize; v_length];
    let mut v2 = vec![-1isize; v_length];
    v1[(v_offset + 1) as usize] = 0;
    v2[(v_offset + 1) as usize] = 0;

    let delta = n - m;
    let front = delta % 2 != 0;
    let mut k1start = 0isize;
    let mut k1end = 0isize;
    let mut k2start = 0isize;
    let mut k2end = 0isize;

    for d in 0..max_d {
        let mut k1 = -d + k1start;
        while k1 <= d - k1end {
            let k1_offset = (v_offset + k1) as usize;
            let mut x1 = if k1 == -d || (k1 != d && v1[k1_offset - 1] < v1[k1_offset + 1]) {
                v1[k1_offset + 1]
            } else {
                v1[k1_offset - 1] + 1
            };
            let mut y1 = x1 - k1;
            while x1 < n && y1 < m && a[x1 as usize] == b[y1 as usize] {
                x1 += 1;
                y1 += 1;
            }
            v1[k1_offset] = x1;
            if x1 > n {
                k1end += 2;
            } else if y1 > m {
                k1start += 2;
            } else if front {
                let k2_offset = v_offset + delta - k1;
                if k2_offset >= 0 && (k2_offset as usize) < v_length {
                    let v2o = v2[k2_offset as usize];
                    if v2o != -1 && x1 >= n - v2o {
                        return bisect_split(a, b, x1 as usize, y1 as usize);
                    }
                }
            }
            k1 += 2;
        }

        let mut k2 = -d + k2start;
        while k2 <= d - k2end {
            let k2_offset = (v_offset + k2) as usize;
            let mut x2 = if k2 == -d || (k2 != d && v2[k2_offset - 1] < v2[k2_offset + 1]) {
                v2[k2_offset + 1]
            } else {
                v2[k2_offset - 1] + 1
            };
            let mut y2 = x2 - k2;
            while x2 < n
                && y2 < m
                && a[(n - x2 - 1) as usize] == b[(m - y2 - 1) as usize]
            {
                x2 += 1;
                y2 += 1;
            }
            v2[k2_offset] = x2;
            if x2 > n {
                k2end += 2;
            } else if y2 > m {
                k2start += 2;
            } else if !front {
                let k1_offset = v_offset + delta - k2;
                if k1_offset >= 0 && (k1_offset as usize) < v_length {
                    let x1 = v1[k1_offset as usize];
                    if x1 != -1 {
                        let y1 = x1 - (k1_offset as isize - v_offset);
                        if x1 >= n - x2 {
                            return bisect_split(a, b, x1 as usize, y1 as usize);
                        }
                    }
                }
            }
            k2 += 2;
        }
    }

    vec![
        (PatchOpType::Del, collect(a)),
        (PatchOpType::Ins, collect(b)),
    ]
}

/// Diff `src` into `dst`.
pub fn diff(src: &str, dst: &str) -> Patch {
    let a: Vec<char> = src.chars().collect();
    let b: Vec<char> = dst.chars().collect();
    normalize(diff_slices(&a, &b))
}

/// Reconstructs the source text of a patch.
pub fn src(patch: &Patch) -> String {
    patch
        .iter()
        .filter(|(t, _)| *t != PatchOpType::Ins)
        .map(|(_, s)| s.as_str())
        .collect()
}

/// Reconstructs the destination text of a patch.
pub fn dst(patch: &Patch) -> String {
    patch
        .iter()
        .filter(|(t, _)| *t != PatchOpType::Del)
        .map(|(_, s)| s.as_str())
        .collect()
}
