use std::cmp::Ordering;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub common: Vec<String>,
    pub only_in_source: Vec<String>,
    pub only_in_destination: Vec<String>,
}

impl Reconciliation {
    pub fn is_symmetric(&self) -> bool {
        self.only_in_source.is_empty() && self.only_in_destination.is_empty()
    }
}

/// Single merge pass over two lexicographically sorted, de-duplicated lists.
pub fn reconcile(source: &[String], destination: &[String]) -> Reconciliation {
    let mut out = Reconciliation::default();
    let (mut i, mut j) = (0, 0);
    while i < source.len() && j < destination.len() {
        match source[i].cmp(&destination[j]) {
            Ordering::Equal => {
                out.common.push(source[i].clone());
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                out.only_in_source.push(source[i].clone());
                i += 1;
            }
            Ordering::Greater => {
                out.only_in_destination.push(destination[j].clone());
                j += 1;
            }
        }
    }
    out.only_in_source.extend_from_slice(&source[i..]);
    out.only_in_destination.extend_from_slice(&destination[j..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn splits_common_and_one_sided_tables() {
        let out = reconcile(&names(&["a", "b", "d", "e"]), &names(&["b", "c", "e", "f"]));
        assert_eq!(out.common, names(&["b", "e"]));
        assert_eq!(out.only_in_source, names(&["a", "d"]));
        assert_eq!(out.only_in_destination, names(&["c", "f"]));
        assert!(!out.is_symmetric());
    }

    #[test]
    fn identical_and_empty_inputs() {
        let same = names(&["t1", "t2"]);
        let out = reconcile(&same, &same);
        assert!(out.is_symmetric());
        assert_eq!(out.common, same);

        let out = reconcile(&[], &names(&["t1"]));
        assert_eq!(out.only_in_destination, names(&["t1"]));
        assert!(out.common.is_empty());
    }
}
