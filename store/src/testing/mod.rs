//! Test fixtures shared by unit and end-to-end tests.

/// Keys "abc", "abd", ... "abz", "acc", ... in increasing order.
///
/// The last letter runs `c..=z` and the middle letter `b..=z`, which gives
/// 600 keys per leading letter.
#[must_use]
pub fn three_letter_keys(n: usize) -> Vec<String> {
    let mut keys = Vec::with_capacity(n);
    'outer: for a in b'a'..=b'z' {
        for b in b'b'..=b'z' {
            for c in b'c'..=b'z' {
                if keys.len() == n {
                    break 'outer;
                }
                keys.push(String::from_utf8_lossy(&[a, b, c]).into_owned());
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_letter_keys_are_sorted() {
        let keys = three_letter_keys(1300);
        assert_eq!(keys.len(), 1300);
        assert_eq!(&keys[..3], &["abc", "abd", "abe"]);
        assert_eq!(keys[24], "acc");
        assert_eq!(keys[600], "bbc");
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
