// vim: tw=80
//! The whole pipeline, from driver commands to tape
use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    thread,
    time::Duration,
};

use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};
use taper_core::{
    buffer::{BufState, BufferPool},
    channel::{self, ReaderMsg, WriterMsg},
    device::TapeDevice,
    label::TapeHeader,
    policy::LabelPolicy,
    reader::{Outcome, Reader, Source},
    tape_manager::TapeManager,
    taper::Taper,
    tapelist::TapeList,
    vtape::{self, Record, VTape},
    BufIdx,
    Result,
};
use tempfile::TempDir;

use super::tempdir;

const BLOCKSIZE: usize = 1024;
const NBUFS: usize = 4;

type Transitions = Arc<Mutex<Vec<(BufIdx, BufState, BufState)>>>;

struct Harness {
    dir: TempDir,
    transitions: Transitions,
}

impl Harness {
    fn tapedev(&self) -> std::path::PathBuf {
        self.dir.path().join("vtape")
    }

    fn pool(&self) -> BufferPool {
        let transitions = self.transitions.clone();
        BufferPool::alloc(NBUFS, BLOCKSIZE)
            .with_observer(Box::new(move |idx: BufIdx, from, to| {
                transitions.lock().unwrap().push((idx, from, to));
            }))
    }

    fn taper(&self) -> Taper {
        let policy = LabelPolicy::new("^DAILY-[0-9]+$", 1,
                                      Some("DAILY-%%".to_owned()))
            .unwrap();
        let catalog = TapeList::load(self.dir.path().join("tapelist")).unwrap();
        let tapes = TapeManager::new(VTape::new(None), catalog, policy)
            .tapedev(self.tapedev());
        Taper::new(self.pool(), tapes)
    }

    fn count(&self, from: BufState, to: BufState) -> usize {
        self.transitions.lock().unwrap()
            .iter()
            .filter(|(_, f, t)| *f == from && *t == to)
            .count()
    }

    /// Replay every recorded transition, checking that each one started from
    /// the state that the buffer was actually in.
    fn replay(&self) -> Vec<BufState> {
        let mut states = vec![BufState::Empty; NBUFS];
        for (idx, from, to) in self.transitions.lock().unwrap().iter() {
            assert_eq!(states[*idx], *from, "buffer {idx}");
            assert!(matches!((from, to),
                (BufState::Empty, BufState::Filling) |
                (BufState::Filling, BufState::Full) |
                (BufState::Filling, BufState::Empty) |
                (BufState::Full, BufState::Empty)),
                "illegal transition {from:?} -> {to:?}");
            states[*idx] = *to;
        }
        states
    }
}

#[fixture]
fn harness() -> Harness {
    let dir = tempdir();
    fs::create_dir(dir.path().join("vtape")).unwrap();
    Harness { dir, transitions: Arc::default() }
}

/// Write a 10 kB file using 1 kB buffers
#[rstest]
#[tokio::test]
async fn end_to_end(harness: Harness) {
    let src = harness.dir.path().join("d1");
    let data = (0..10240u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
    fs::write(&src, &data).unwrap();
    let input = format!("START-TAPER 20240101\n\
                         FILE-WRITE H1 {} host1 disk1 0\n\
                         QUIT\n", src.display());

    let taper = harness.taper();
    let pool = taper.pool().clone();
    let mut output = Vec::new();
    taper.serve(input.as_bytes(), &mut output).await.unwrap();

    let out = String::from_utf8(output).unwrap();
    let lines = out.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 3, "{out}");
    assert_eq!(lines[0], "TAPER-OK");
    assert!(lines[1].starts_with("DONE H1 DAILY-01 1 [sec "), "{}", lines[1]);
    assert!(lines[1].contains(" kb 10 kps "), "{}", lines[1]);
    assert_eq!(lines[2], "QUITTING");

    assert_eq!(harness.count(BufState::Filling, BufState::Full), 10);
    assert_eq!(harness.count(BufState::Full, BufState::Empty), 10);
    // The final read found end of file, and gave its buffer back unused
    assert_eq!(harness.count(BufState::Empty, BufState::Filling), 11);
    assert_eq!(harness.replay(), vec![BufState::Empty; NBUFS]);
    assert_eq!(pool.census().empty, NBUFS);

    let records = vtape::dump(&harness.tapedev()).unwrap();
    assert!(matches!(&records[0], Record::Label(h) if h.label == "DAILY-01"));
    assert_eq!(records[1], Record::Filemark);
    let blocks = records.iter()
        .filter_map(|r| match r {
            Record::Block(b) => Some(b.clone()),
            _ => None
        }).collect::<Vec<_>>();
    assert_eq!(blocks.len(), 10);
    assert_eq!(blocks.concat(), data);
    assert!(matches!(records.last(), Some(Record::End(h))
                     if h.label == "DAILY-01"));

    let catalog = TapeList::load(harness.dir.path().join("tapelist")).unwrap();
    assert_eq!(catalog.entries()[0].label, "DAILY-01");
    assert_eq!(catalog.entries()[0].datestamp, "20240101");
}

/// Several files in one run get consecutive file numbers, and the buffer pool
/// is conserved throughout.
#[rstest]
#[tokio::test]
async fn several_files(harness: Harness) {
    let mut input = "START-TAPER 20240102\n".to_owned();
    for (i, len) in [0usize, 1, 3 * BLOCKSIZE, 7 * BLOCKSIZE + 5]
        .into_iter()
        .enumerate()
    {
        let src = harness.dir.path().join(format!("d{i}"));
        fs::write(&src, vec![b'a' + i as u8; len]).unwrap();
        input.push_str(&format!("FILE-WRITE H{i} {} host1 disk{i} 1\n",
                                src.display()));
    }
    input.push_str("QUIT\n");

    let mut output = Vec::new();
    harness.taper().serve(input.as_bytes(), &mut output).await.unwrap();

    let out = String::from_utf8(output).unwrap();
    let lines = out.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 6, "{out}");
    for i in 0..4 {
        let prefix = format!("DONE H{i} DAILY-01 {} [", i + 1);
        assert!(lines[i + 1].starts_with(&prefix), "{}", lines[i + 1]);
    }
    assert_eq!(harness.replay(), vec![BufState::Empty; NBUFS]);
    // 0 + 1 + 3 + 8 blocks
    assert_eq!(harness.count(BufState::Full, BufState::Empty), 12);

    let records = vtape::dump(&harness.tapedev()).unwrap();
    let filemarks = records.iter()
        .filter(|r| **r == Record::Filemark)
        .count();
    // One before each file, and one before the end marker
    assert_eq!(filemarks, 5);
}

/// A writer that grants the same buffer twice provokes a desync.  The file
/// fails, but the pipeline survives.
#[tokio::test]
async fn desync() {
    let dir = tempdir();
    let src = dir.path().join("d1");
    fs::write(&src, vec![1u8; 3 * BLOCKSIZE]).unwrap();
    let pool = Arc::new(BufferPool::alloc(NBUFS, BLOCKSIZE));
    let (rchan, mut wchan) = channel::pair();
    let mut reader = Reader::new(pool.clone(), rchan);
    let source = Source::open(&src).await.unwrap();
    let task = tokio::spawn(async move {
        reader.write_file("host1:disk1.0", source).await
    });

    assert_eq!(wchan.recv_from_reader().await.unwrap(),
               ReaderMsg::Open("host1:disk1.0".to_owned()));
    wchan.send_to_reader(&WriterMsg::OpenAck).await.unwrap();
    wchan.send_to_reader(&WriterMsg::Grant(0)).await.unwrap();
    assert_eq!(wchan.recv_from_reader().await.unwrap(), ReaderMsg::Data(0));
    wchan.send_to_reader(&WriterMsg::Grant(0)).await.unwrap();
    assert_eq!(wchan.recv_from_reader().await.unwrap(), ReaderMsg::Close);
    wchan.send_to_reader(&WriterMsg::Closed {
        label: "DAILY-01".to_owned(),
        filenum: 1
    }).await.unwrap();

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome,
               Outcome::Failed("fatal buffer mismanagement bug".to_owned()));
    assert_eq!(pool.state(0), BufState::Full);
}

/// A drive that takes a while to write each block
struct SlowTape {
    vtape: VTape,
    busy: Arc<AtomicBool>,
}

impl TapeDevice for SlowTape {
    fn open(&mut self, path: &Path) -> Result<()> {
        self.vtape.open(path)
    }

    fn close(&mut self) -> Result<()> {
        self.vtape.close()
    }

    fn rewind(&mut self) -> Result<()> {
        self.vtape.rewind()
    }

    fn read_label(&mut self) -> Result<TapeHeader> {
        self.vtape.read_label()
    }

    fn write_label(&mut self, label: &str, datestamp: &str) -> Result<()> {
        self.vtape.write_label(label, datestamp)
    }

    fn write_filemark(&mut self) -> Result<()> {
        self.vtape.write_filemark()
    }

    fn write_end_marker(&mut self, label: &str, datestamp: &str) -> Result<()>
    {
        self.vtape.write_end_marker(label, datestamp)
    }

    fn write_block(&mut self, block: &[u8]) -> Result<()> {
        self.busy.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        let r = self.vtape.write_block(block);
        self.busy.store(false, Ordering::SeqCst);
        r
    }
}

/// With input faster than the drive, the reader keeps filling buffers while
/// blocks are being written, and the drive never waits on the reader.
#[tokio::test]
async fn slow_tape() {
    let dir = tempdir();
    let tapedev = dir.path().join("vtape");
    fs::create_dir(&tapedev).unwrap();
    let src = dir.path().join("d1");
    let data = (0..40 * BLOCKSIZE).map(|i| (i % 13) as u8).collect::<Vec<_>>();
    fs::write(&src, &data).unwrap();

    let busy = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicUsize::new(0));
    let pool = {
        let busy = busy.clone();
        let overlapped = overlapped.clone();
        BufferPool::alloc(NBUFS, BLOCKSIZE)
            .with_observer(Box::new(
                move |_: BufIdx, from: BufState, to: BufState| {
                    if from == BufState::Filling && to == BufState::Full &&
                        busy.load(Ordering::SeqCst)
                    {
                        overlapped.fetch_add(1, Ordering::SeqCst);
                    }
                }))
    };
    let policy = LabelPolicy::new(".*", 1, Some("DAILY-%%".to_owned()))
        .unwrap();
    let catalog = TapeList::load(dir.path().join("tapelist")).unwrap();
    let device = SlowTape { vtape: VTape::new(None), busy };
    let tapes = TapeManager::new(device, catalog, policy).tapedev(&tapedev);
    let taper = Taper::new(pool, tapes);

    let input = format!("START-TAPER 20240101\n\
                         FILE-WRITE H1 {} host1 disk1 0\n\
                         QUIT\n", src.display());
    let mut output = Vec::new();
    taper.serve(input.as_bytes(), &mut output).await.unwrap();

    let out = String::from_utf8(output).unwrap();
    assert!(out.contains("DONE H1 DAILY-01 1 ["), "{out}");
    let n = overlapped.load(Ordering::SeqCst);
    assert!(n >= 10, "only {n} of 40 buffers were filled during tape writes");

    let blocks = vtape::dump(&tapedev).unwrap()
        .into_iter()
        .filter_map(|r| match r {
            Record::Block(b) => Some(b),
            _ => None
        }).collect::<Vec<_>>();
    assert_eq!(blocks.concat(), data);
}
