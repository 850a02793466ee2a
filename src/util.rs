//! Small helpers shared by the entry codec, node splitting, and overflow
//! chunking.

/// Iterate over a slice two elements at a time: `[a, b, c]` yields
/// `(a, b), (b, c)`.
pub fn pairwise<T>(items: &[T]) -> impl Iterator<Item = (&T, &T)> {
    items.iter().zip(items.iter().skip(1))
}

/// Split `data` into chunks of at most `chunk_size` bytes, yielding each
/// chunk alongside whether it is the last one.
pub fn iter_slice(data: &[u8], chunk_size: usize) -> impl Iterator<Item = (&[u8], bool)> {
    assert!(chunk_size > 0);
    let total = data.len();
    (0..total)
        .step_by(chunk_size)
        .map(move |start| {
            let stop = (start + chunk_size).min(total);
            (&data[start..stop], stop >= total)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairwise_yields_adjacent_pairs() {
        let items = vec![1, 2, 3, 4];
        let pairs: Vec<(i32, i32)> = pairwise(&items).map(|(a, b)| (*a, *b)).collect();
        assert_eq!(pairs, vec![(1, 2), (2, 3), (3, 4)]);
    }

    #[test]
    fn pairwise_empty_and_singleton() {
        let empty: Vec<i32> = vec![];
        assert_eq!(pairwise(&empty).count(), 0);
        let one = vec![1];
        assert_eq!(pairwise(&one).count(), 0);
    }

    #[test]
    fn iter_slice_chunks_and_marks_last() {
        let data = b"123456789";
        let chunks: Vec<(&[u8], bool)> = iter_slice(data, 4).collect();
        assert_eq!(
            chunks,
            vec![
                (&b"1234"[..], false),
                (&b"5678"[..], false),
                (&b"9"[..], true),
            ]
        );
    }

    #[test]
    fn iter_slice_exact_multiple_marks_last_full_chunk() {
        let data = b"12345678";
        let chunks: Vec<(&[u8], bool)> = iter_slice(data, 4).collect();
        assert_eq!(chunks, vec![(&b"1234"[..], false), (&b"5678"[..], true)]);
    }

    #[test]
    fn iter_slice_empty_input_yields_nothing() {
        let data: &[u8] = b"";
        assert_eq!(iter_slice(data, 4).count(), 0);
    }
}
