use super::*;

/// Collects `(line_no, offset, bytes)` triples for assertions.
#[derive(Default)]
struct Collect {
    lines: Vec<(u64, u64, Vec<u8>)>,
}

impl LineSink for Collect {
    fn on_line(&mut self, line_no: u64, offset: u64, line: &[u8]) -> anyhow::Result<()> {
        self.lines.push((line_no, offset, line.to_vec()));
        Ok(())
    }
}

fn scan(windows: &[&[u8]]) -> (Collect, LineFinder) {
    let mut finder = LineFinder::new();
    let mut sink = Collect::default();
    for (i, w) in windows.iter().enumerate() {
        finder
            .add(w, i + 1 == windows.len(), &mut sink)
            .unwrap();
    }
    (sink, finder)
}

#[test]
fn single_window_with_trailing_newline() {
    let (sink, finder) = scan(&[b"apple\nbanana\ncherry\n"]);
    assert_eq!(
        sink.lines,
        vec![
            (1, 0, b"apple".to_vec()),
            (2, 6, b"banana".to_vec()),
            (3, 13, b"cherry".to_vec()),
        ]
    );
    assert_eq!(finder.line_offsets(), &[0, 6, 13, 20]);
    assert_eq!(finder.line_count(), 3);
    assert_eq!(finder.total_bytes(), 20);
}

#[test]
fn final_line_without_newline() {
    let (sink, finder) = scan(&[b"one\ntwo\nthree"]);
    assert_eq!(sink.lines.len(), 3);
    assert_eq!(sink.lines[2], (3, 8, b"three".to_vec()));
    // The sentinel is the total size, so the last length excludes the
    // newline the source never had.
    assert_eq!(finder.line_offsets(), &[0, 4, 8, 13]);
}

#[test]
fn lines_split_across_windows() {
    let (sink, finder) = scan(&[b"hel", b"lo\nwo", b"rld\n"]);
    assert_eq!(
        sink.lines,
        vec![(1, 0, b"hello".to_vec()), (2, 6, b"world".to_vec())]
    );
    assert_eq!(finder.line_offsets(), &[0, 6, 11]);
}

#[test]
fn long_line_spanning_many_windows() {
    let body = vec![b'x'; 10_000];
    let mut data = body.clone();
    data.push(b'\n');
    data.extend_from_slice(b"tail\n");

    let windows: Vec<&[u8]> = data.chunks(97).collect();
    let (sink, _) = scan(&windows);
    assert_eq!(sink.lines.len(), 2);
    assert_eq!(sink.lines[0].2, body);
    assert_eq!(sink.lines[1], (2, 10_001, b"tail".to_vec()));
}

#[test]
fn empty_lines_are_real_lines() {
    let (sink, finder) = scan(&[b"\n\na\n"]);
    assert_eq!(
        sink.lines,
        vec![
            (1, 0, b"".to_vec()),
            (2, 1, b"".to_vec()),
            (3, 2, b"a".to_vec()),
        ]
    );
    assert_eq!(finder.line_offsets(), &[0, 1, 2, 4]);
}

#[test]
fn empty_stream_yields_no_lines() {
    let (sink, finder) = scan(&[b""]);
    assert!(sink.lines.is_empty());
    assert_eq!(finder.line_offsets(), &[0]);
    assert_eq!(finder.line_count(), 0);
}

#[test]
fn empty_final_window_flushes_partial() {
    let mut finder = LineFinder::new();
    let mut sink = Collect::default();
    finder.add(b"unfinished", false, &mut sink).unwrap();
    assert!(sink.lines.is_empty());
    finder.add(b"", true, &mut sink).unwrap();
    assert_eq!(sink.lines, vec![(1, 0, b"unfinished".to_vec())]);
    assert_eq!(finder.line_offsets(), &[0, 10]);
}

#[test]
fn sink_error_stops_the_scan() {
    struct FailSecond(u64);
    impl LineSink for FailSecond {
        fn on_line(&mut self, line_no: u64, _: u64, _: &[u8]) -> anyhow::Result<()> {
            self.0 = line_no;
            if line_no == 2 {
                anyhow::bail!("sink rejected line {line_no}");
            }
            Ok(())
        }
    }
    let mut finder = LineFinder::new();
    let mut sink = FailSecond(0);
    let err = finder.add(b"a\nb\nc\n", true, &mut sink).unwrap_err();
    assert!(err.to_string().contains("line 2"));
    assert_eq!(sink.0, 2);
}
