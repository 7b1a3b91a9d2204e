use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use library_upgrader::analyzers::quality::Container;
use library_upgrader::config::{LibraryConfig, MaterializeSettings, UpgradeSettings};
use library_upgrader::pipeline::apply::ApplyUpgrade;
use library_upgrader::pipeline::materialize::{expected_conversion_output, Materializer, Placement, FAILED_PREFIX};
use library_upgrader::pipeline::records::MaterializeFailure;
use library_upgrader::pipeline::snapshot::{LibrarySnapshotLoader, SNAPSHOT_FILE_NAME};
use library_upgrader::pipeline::upgrade_check::{UpgradeCheck, INELIGIBLE_PREFIX};
use library_upgrader::services::library::{LibraryMatch, LibraryService, SearchStrategy, TermMatch, TrackQuery};
use library_upgrader::services::player::{posix_to_hfs, PlayerBridge, TrackInfo};
use library_upgrader::utils::checkpoint::{latest_checkpoint, read_checkpoint, write_checkpoint};
use library_upgrader::{
    ApplyRecord, AudioCodec, Candidate, MaterializedFile, MaterializedRecord, Result, TagReader, TagWriter,
    TrackRecord, TrackTags, UpgradeCheckRecord, UpgradeDecision, UpgradeOutcome, UpgraderError, YearAction,
    YearUpdate,
};
use pretty_assertions::assert_eq;
use regex::Regex;
use tempfile::TempDir;

const VOLUME: &str = "Macintosh HD";

#[derive(Default)]
struct MapReader {
    tags: HashMap<PathBuf, TrackTags>,
}

impl MapReader {
    fn add(&mut self, path: &Path, title: &str, codec: AudioCodec, container: Container, bitrate: Option<u32>) {
        self.tags.insert(
            path.to_path_buf(),
            TrackTags {
                path: path.to_path_buf(),
                title: title.to_string(),
                artist: "Meat Puppets".into(),
                album: "II".into(),
                codec,
                container,
                bitrate,
                year: None,
            },
        );
    }
}

impl TagReader for MapReader {
    fn read_tags(&self, path: &Path) -> Result<TrackTags> {
        self.tags.get(path).cloned().ok_or_else(|| UpgraderError::UnreadableMedia {
            path: path.to_path_buf(),
            reason: "no tags".into(),
        })
    }
}

#[derive(Default)]
struct RecordingWriter {
    writes: RefCell<Vec<(PathBuf, String)>>,
}

impl TagWriter for RecordingWriter {
    fn write_year(&self, path: &Path, year: &str) -> Result<()> {
        self.writes.borrow_mut().push((path.to_path_buf(), year.to_string()));
        Ok(())
    }
}

/// Rejects every tag rewrite.
struct ReadOnlyWriter;

impl TagWriter for ReadOnlyWriter {
    fn write_year(&self, path: &Path, _year: &str) -> Result<()> {
        Err(UpgraderError::TagWrite { path: path.to_path_buf(), reason: "read-only file".into() })
    }
}

/// Answers title lookups from a table, honoring whole-field and pattern terms.
#[derive(Default)]
struct FakeLibrary {
    by_title: HashMap<String, PathBuf>,
    reject_patterns: bool,
    broken_title: Option<String>,
    /// Conversion output tree; `None` means conversions produce nothing.
    convert_dest: Option<PathBuf>,
    converted: RefCell<Vec<PathBuf>>,
}

impl LibraryService for FakeLibrary {
    fn find_track(&self, query: &TrackQuery) -> Result<Option<LibraryMatch>> {
        if self.reject_patterns && query.terms.iter().any(|t| t.kind == TermMatch::Pattern) {
            return Err(UpgraderError::InvalidQuery("bad pattern".into()));
        }
        let Some(term) = query.terms.iter().find(|t| t.field == "title") else {
            return Ok(None);
        };
        if self.broken_title.as_deref() == Some(term.value.as_str()) {
            return Err(UpgraderError::Command { program: "beet".into(), message: "database is locked".into() });
        }
        let hit = self.by_title.iter().find(|(title, _)| match term.kind {
            TermMatch::Pattern => Regex::new(&format!("^{}$", term.value)).unwrap().is_match(title),
            _ => title.eq_ignore_ascii_case(&term.value),
        });
        Ok(hit.map(|(_, path)| LibraryMatch {
            path: path.clone(),
            original_year: "1984".into(),
            year: "1999".into(),
            id: "42".into(),
        }))
    }

    fn convert(&self, path: &Path) -> Result<()> {
        self.converted.borrow_mut().push(path.to_path_buf());
        if let Some(dest) = &self.convert_dest {
            let output = expected_conversion_output(path, dest, "FLAC");
            fs::create_dir_all(output.parent().unwrap_or(dest))?;
            fs::write(output, b"converted")?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakePlayer {
    tracks: HashMap<String, TrackInfo>,
    order: Vec<String>,
    refuse_repoint: Vec<String>,
    repointed: Mutex<Vec<(String, String)>>,
}

impl PlayerBridge for FakePlayer {
    fn enumerate_all_persistent_ids(&self) -> Result<Vec<String>> {
        Ok(self.order.clone())
    }

    fn track_info(&self, persistent_id: &str) -> Result<TrackInfo> {
        self.tracks
            .get(persistent_id)
            .cloned()
            .ok_or_else(|| UpgraderError::Bridge(format!("no track {}", persistent_id)))
    }

    fn set_file_location(&self, persistent_id: &str, hfs_path: &str) -> Result<()> {
        if self.refuse_repoint.iter().any(|id| id == persistent_id) {
            return Err(UpgraderError::Bridge("file not found".into()));
        }
        self.repointed
            .lock()
            .unwrap()
            .push((persistent_id.to_string(), hfs_path.to_string()));
        Ok(())
    }
}

fn touch(path: &Path, contents: &[u8]) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
    path.to_path_buf()
}

fn track(id: &str, number: u32, title: &str, location: &Path) -> TrackRecord {
    TrackRecord {
        persistent_id: id.into(),
        track_number: number,
        track_name: title.into(),
        track_artist: "Meat Puppets".into(),
        album: "II".into(),
        album_artist: "Meat Puppets".into(),
        track_year: "1984".into(),
        last_played: None,
        play_count: 3,
        location: location.to_path_buf(),
    }
}

fn settings(strategies: Vec<SearchStrategy>) -> UpgradeSettings {
    UpgradeSettings { compare_tags: true, strategies, year_action: YearAction::IncumbentYear }
}

fn library_config(convert_dest: &Path) -> LibraryConfig {
    LibraryConfig {
        command: vec!["beet".into()],
        convert_dest: convert_dest.to_path_buf(),
        convert_source_dir: "FLAC".into(),
    }
}

fn better(check_track: TrackRecord, candidate: &Path) -> UpgradeCheckRecord {
    UpgradeCheckRecord {
        track: check_track,
        decision: UpgradeDecision::with_candidate(
            UpgradeOutcome::BetterQuality,
            Candidate { path: candidate.to_path_buf(), id: "42".into(), original_year: "1984".into(), year: "1999".into() },
        ),
        year_action: YearAction::Keep,
    }
}

#[test]
fn higher_bitrate_copy_runs_through_every_stage() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let incumbent = touch(&root.path().join("music/Meat Puppets/II/06 Lake of Fire.mp3"), b"128k");
    let candidate = touch(&root.path().join("library/MP3/Meat Puppets/II/06 Lake of Fire.mp3"), b"256k");

    let mut reader = MapReader::default();
    reader.add(&incumbent, "Lake of Fire", AudioCodec::Mp3, Container::Mpeg, Some(128));
    reader.add(&candidate, "Lake of Fire", AudioCodec::Mp3, Container::Mpeg, Some(256));
    let library = FakeLibrary {
        by_title: HashMap::from([("Lake of Fire".to_string(), candidate.clone())]),
        ..Default::default()
    };

    fs::create_dir_all(&data).unwrap();
    let snapshot = data.join(SNAPSHOT_FILE_NAME);
    write_checkpoint(&snapshot, &[track("A1", 6, "Lake of Fire", &incumbent)]).unwrap();

    let upgrade_settings = settings(vec![SearchStrategy::Exact]);
    let checked = UpgradeCheck::new(&library, &reader, &upgrade_settings, &data).run(&snapshot).unwrap();
    assert_eq!(checked.count("BETTER_QUALITY"), 1);
    assert_eq!(checked.outputs.len(), 1);

    let staging = root.path().join("staging");
    let writer = RecordingWriter::default();
    let materialized = Materializer::new(
        &library,
        &reader,
        &writer,
        &library_config(&staging),
        &MaterializeSettings::default(),
        &data,
    )
    .run(&checked.outputs[0])
    .unwrap();
    assert_eq!(materialized.count("materialized"), 1);

    let placed = staging.join("MP3/Meat Puppets/II/06 Lake of Fire.mp3");
    assert_eq!(fs::read(&placed).unwrap(), b"256k");
    assert_eq!(writer.writes.borrow().clone(), vec![(placed.clone(), "1984".to_string())]);
    let rows: Vec<MaterializedRecord> = read_checkpoint(&materialized.outputs[0]).unwrap();
    assert_eq!(rows[0].file, MaterializedFile { path: placed.clone(), target_existed: false });
    assert_eq!(rows[0].year_update, YearUpdate::Written);

    let player = FakePlayer::default();
    let applied = ApplyUpgrade::new(&player, VOLUME, &data).run(&materialized.outputs[0]).unwrap();
    assert_eq!(applied.count("applied"), 1);
    assert!(!incumbent.exists());
    assert_eq!(
        player.repointed.lock().unwrap().clone(),
        vec![("A1".to_string(), posix_to_hfs(&placed.to_string_lossy(), VOLUME))]
    );
    let rows: Vec<ApplyRecord> = read_checkpoint(&applied.outputs[0]).unwrap();
    assert!(rows[0].success);
}

#[test]
fn outcomes_are_split_between_eligible_and_ineligible_checkpoints() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let mut reader = MapReader::default();
    let mut library = FakeLibrary::default();
    let mut tracks = Vec::new();

    let cases = [
        ("Plateau", AudioCodec::Alac, Container::Mp4, Some(900), "Plateau", "m4a"),
        ("Split Myself in Two", AudioCodec::Mp3, Container::Mpeg, Some(256), "Aurora Borealis", "mp3"),
        ("Oh, Me", AudioCodec::Mp3, Container::Mpeg, Some(128), "Oh, Me", "mp3"),
    ];
    for (n, (title, codec, container, bitrate, candidate_title, ext)) in cases.iter().enumerate() {
        let incumbent = root.path().join(format!("music/{}.mp3", title));
        let candidate = root.path().join(format!("library/{}.{}", title, ext));
        reader.add(&incumbent, title, AudioCodec::Mp3, Container::Mpeg, Some(128));
        reader.add(&candidate, candidate_title, *codec, *container, *bitrate);
        library.by_title.insert(title.to_string(), candidate);
        tracks.push(track(&format!("T{}", n), n as u32 + 1, title, &incumbent));
    }
    tracks.push(track("T9", 9, "We're Here", &root.path().join("music/We're Here.mp3")));

    fs::create_dir_all(&data).unwrap();
    let snapshot = data.join(SNAPSHOT_FILE_NAME);
    write_checkpoint(&snapshot, &tracks).unwrap();

    let upgrade_settings = settings(vec![SearchStrategy::Exact]);
    let report = UpgradeCheck::new(&library, &reader, &upgrade_settings, &data).run(&snapshot).unwrap();

    assert_eq!(report.count("BETTER_QUALITY"), 1);
    assert_eq!(report.count("DO_NOT_MATCH"), 1);
    assert_eq!(report.count("SAME_QUALITY"), 1);
    assert_eq!(report.count("NOT_FOUND"), 1);

    let eligible: Vec<UpgradeCheckRecord> = read_checkpoint(&report.outputs[0]).unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].track.track_name, "Plateau");
    assert_eq!(eligible[0].decision.candidate().unwrap().path, root.path().join("library/Plateau.m4a"));

    let ineligible: Vec<UpgradeCheckRecord> =
        read_checkpoint(latest_checkpoint(&data, INELIGIBLE_PREFIX).unwrap()).unwrap();
    let outcomes: Vec<_> = ineligible.iter().map(|r| r.decision.outcome()).collect();
    assert_eq!(
        outcomes,
        vec![UpgradeOutcome::DoNotMatch, UpgradeOutcome::SameQuality, UpgradeOutcome::NotFound]
    );
    assert!(ineligible[2].decision.candidate().is_none());
}

#[test]
fn skipping_tag_comparison_accepts_a_differently_tagged_candidate() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let incumbent = root.path().join("music/Magic Toy Missing.mp3");
    let candidate = root.path().join("library/Magic Toy Missing.flac");

    let mut reader = MapReader::default();
    reader.add(&incumbent, "Magic Toy Missing", AudioCodec::Mp3, Container::Mpeg, Some(192));
    reader.add(&candidate, "Magic Toy Missing (Remastered)", AudioCodec::Flac, Container::Flac, Some(1000));
    let library = FakeLibrary {
        by_title: HashMap::from([("Magic Toy Missing".to_string(), candidate)]),
        ..Default::default()
    };

    fs::create_dir_all(&data).unwrap();
    let snapshot = data.join(SNAPSHOT_FILE_NAME);
    write_checkpoint(&snapshot, &[track("M1", 8, "Magic Toy Missing", &incumbent)]).unwrap();

    let mut upgrade_settings = settings(vec![SearchStrategy::Exact]);
    upgrade_settings.compare_tags = false;
    let report = UpgradeCheck::new(&library, &reader, &upgrade_settings, &data).run(&snapshot).unwrap();
    assert_eq!(report.count("BETTER_QUALITY"), 1);
}

#[test]
fn rejected_patterns_fall_through_to_the_next_strategy() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let incumbent = root.path().join("music/New Gods.mp3");
    let candidate = root.path().join("library/New Gods.flac");

    let mut reader = MapReader::default();
    reader.add(&incumbent, "New Gods", AudioCodec::Mp3, Container::Mpeg, Some(128));
    reader.add(&candidate, "New Gods", AudioCodec::Flac, Container::Flac, Some(900));
    let library = FakeLibrary {
        by_title: HashMap::from([("New Gods".to_string(), candidate)]),
        reject_patterns: true,
        ..Default::default()
    };

    fs::create_dir_all(&data).unwrap();
    let snapshot = data.join(SNAPSHOT_FILE_NAME);
    write_checkpoint(&snapshot, &[track("N1", 2, "New Gods", &incumbent)]).unwrap();

    let upgrade_settings = settings(vec![SearchStrategy::Regex, SearchStrategy::Exact]);
    let report = UpgradeCheck::new(&library, &reader, &upgrade_settings, &data).run(&snapshot).unwrap();
    assert_eq!(report.count("BETTER_QUALITY"), 1);
}

#[test]
fn library_failure_aborts_with_a_partial_checkpoint() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let incumbent = root.path().join("music/Aurora Borealis.mp3");
    let candidate = root.path().join("library/Aurora Borealis.flac");

    let mut reader = MapReader::default();
    reader.add(&incumbent, "Aurora Borealis", AudioCodec::Mp3, Container::Mpeg, Some(128));
    reader.add(&candidate, "Aurora Borealis", AudioCodec::Flac, Container::Flac, Some(900));
    let library = FakeLibrary {
        by_title: HashMap::from([("Aurora Borealis".to_string(), candidate)]),
        broken_title: Some("Lost".into()),
        ..Default::default()
    };

    fs::create_dir_all(&data).unwrap();
    let snapshot = data.join(SNAPSHOT_FILE_NAME);
    let tracks = vec![
        track("P1", 1, "Aurora Borealis", &incumbent),
        track("P2", 2, "Lost", &root.path().join("music/Lost.mp3")),
        track("P3", 3, "Climbing", &root.path().join("music/Climbing.mp3")),
    ];
    write_checkpoint(&snapshot, &tracks).unwrap();

    let upgrade_settings = settings(vec![SearchStrategy::Exact]);
    match UpgradeCheck::new(&library, &reader, &upgrade_settings, &data).run(&snapshot) {
        Err(UpgraderError::StageAborted { checkpoint, source }) => {
            assert!(matches!(*source, UpgraderError::Command { .. }));
            let partial: Vec<UpgradeCheckRecord> = read_checkpoint(&checkpoint).unwrap();
            assert_eq!(partial.len(), 1);
            assert_eq!(partial[0].track.persistent_id, "P1");
        }
        other => panic!("expected an aborted stage, got {:?}", other.map(|r| r.tallies)),
    }
}

#[test]
fn missing_conversion_output_fails_only_its_row() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let staging = root.path().join("staging");
    let flac = touch(&root.path().join("library/FLAC/Meat Puppets/II/01 Split Myself in Two.flac"), b"flac");
    let mp3 = touch(&root.path().join("library/MP3/Meat Puppets/II/02 Magic Toy Missing.mp3"), b"mp3");

    let rows = vec![
        better(track("F1", 1, "Split Myself in Two", &root.path().join("music/01.mp3")), &flac),
        better(track("F2", 2, "Magic Toy Missing", &root.path().join("music/02.mp3")), &mp3),
    ];
    fs::create_dir_all(&data).unwrap();
    let input = data.join("upgrade_checks_20240305T120000Z.csv");
    write_checkpoint(&input, &rows).unwrap();

    let library = FakeLibrary::default();
    let reader = MapReader::default();
    let writer = RecordingWriter::default();
    let report = Materializer::new(
        &library,
        &reader,
        &writer,
        &library_config(&staging),
        &MaterializeSettings::default(),
        &data,
    )
    .run(&input)
    .unwrap();

    assert_eq!(report.count("failed"), 1);
    assert_eq!(report.count("materialized"), 1);
    assert_eq!(library.converted.borrow().clone(), vec![flac]);
    assert!(writer.writes.borrow().is_empty());

    let done: Vec<MaterializedRecord> = read_checkpoint(&report.outputs[0]).unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].check.track.persistent_id, "F2");

    let failed: Vec<MaterializeFailure> = read_checkpoint(latest_checkpoint(&data, FAILED_PREFIX).unwrap()).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].check.track.persistent_id, "F1");
    assert!(failed[0].error.contains("Converted file not found"));
}

#[test]
fn converted_output_is_picked_up_from_the_mirrored_path() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let staging = root.path().join("staging");
    let flac = touch(&root.path().join("library/FLAC/Meat Puppets/II/05 Plateau.flac"), b"flac");
    let earlier = touch(&staging.join("FLAC/Meat Puppets/II/05 Plateau.m4a"), b"older conversion");

    let library = FakeLibrary { convert_dest: Some(staging.clone()), ..Default::default() };
    let reader = MapReader::default();
    let writer = RecordingWriter::default();
    let materializer = Materializer::new(
        &library,
        &reader,
        &writer,
        &library_config(&staging),
        &MaterializeSettings::default(),
        &data,
    );

    let record = better(track("C1", 5, "Plateau", &root.path().join("music/05.mp3")), &flac);
    let candidate = record.decision.candidate().unwrap().clone();
    let (placed, year_update) = materializer.materialize(&record, &candidate).unwrap();

    assert_eq!(placed, MaterializedFile { path: earlier.clone(), target_existed: true });
    assert_eq!(year_update, YearUpdate::Unchanged);
    assert_eq!(fs::read(&earlier).unwrap(), b"converted");
    assert_eq!(fs::read(earlier.with_extension("bak")).unwrap(), b"older conversion");
}

#[test]
fn alongside_placement_over_the_incumbent_keeps_the_new_file() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let incumbent = touch(&root.path().join("music/Meat Puppets/II/07 Oh, Me.mp3"), b"old");
    let candidate = touch(&root.path().join("library/MP3/Meat Puppets/II/07 Oh, Me.mp3"), b"new");

    fs::create_dir_all(&data).unwrap();
    let input = data.join("upgrade_checks_20240305T120000Z.csv");
    write_checkpoint(&input, &[better(track("O1", 7, "Oh, Me", &incumbent), &candidate)]).unwrap();

    let library = FakeLibrary::default();
    let reader = MapReader::default();
    let writer = RecordingWriter::default();
    let report = Materializer::new(
        &library,
        &reader,
        &writer,
        &library_config(&root.path().join("staging")),
        &MaterializeSettings { placement: Placement::Alongside },
        &data,
    )
    .run(&input)
    .unwrap();
    assert_eq!(report.count("backed_up"), 1);

    let rows: Vec<MaterializedRecord> = read_checkpoint(&report.outputs[0]).unwrap();
    assert_eq!(rows[0].file, MaterializedFile { path: incumbent.clone(), target_existed: true });
    assert_eq!(fs::read(incumbent.with_extension("bak")).unwrap(), b"old");

    let player = FakePlayer::default();
    let applied = ApplyUpgrade::new(&player, VOLUME, &data).run(&report.outputs[0]).unwrap();
    assert_eq!(applied.count("applied"), 1);
    assert_eq!(fs::read(&incumbent).unwrap(), b"new");
}

#[test]
fn apply_records_failed_repoints_and_tolerates_missing_incumbents() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let gone = root.path().join("music/already deleted.mp3");
    let present = touch(&root.path().join("music/present.mp3"), b"old");
    let new_a = touch(&root.path().join("staging/a.mp3"), b"a");
    let new_b = touch(&root.path().join("staging/b.mp3"), b"b");

    let rows = vec![
        MaterializedRecord {
            check: better(track("G1", 1, "Gone", &gone), &new_a),
            file: MaterializedFile { path: new_a.clone(), target_existed: false },
            year_update: YearUpdate::Unchanged,
        },
        MaterializedRecord {
            check: better(track("R1", 2, "Refused", &present), &new_b),
            file: MaterializedFile { path: new_b.clone(), target_existed: false },
            year_update: YearUpdate::Written,
        },
    ];
    fs::create_dir_all(&data).unwrap();
    let input = data.join("materialized_20240305T120000Z.csv");
    write_checkpoint(&input, &rows).unwrap();

    let player = FakePlayer { refuse_repoint: vec!["R1".into()], ..Default::default() };
    let report = ApplyUpgrade::new(&player, VOLUME, &data).run(&input).unwrap();
    assert_eq!(report.count("applied"), 1);
    assert_eq!(report.count("apply_failed"), 1);
    assert!(!present.exists());

    let applied: Vec<ApplyRecord> = read_checkpoint(&report.outputs[0]).unwrap();
    let results: Vec<_> = applied
        .iter()
        .map(|r| (r.materialized.check.track.persistent_id.as_str(), r.success))
        .collect();
    assert_eq!(results, vec![("G1", true), ("R1", false)]);
}

fn info(number: &str, name: &str, album: &str, location: &str) -> TrackInfo {
    TrackInfo {
        track_number: number.into(),
        name: name.into(),
        artist: "Meat Puppets".into(),
        album: album.into(),
        album_artist: "Meat Puppets".into(),
        year: "1984".into(),
        last_played: "Tuesday, March 5, 2024 at 8:15:00 PM".into(),
        play_count: "4".into(),
        location: location.into(),
    }
}

#[test]
fn snapshot_is_sorted_and_previous_one_is_kept() {
    let root = TempDir::new().unwrap();
    let snapshot = root.path().join("data").join(SNAPSHOT_FILE_NAME);
    let player = FakePlayer {
        order: vec!["Z9".into(), "B2".into(), "MISSING".into(), "A1".into(), "C3".into()],
        tracks: HashMap::from([
            ("Z9".to_string(), info("2", "Maiden's Milk", "II", "Macintosh HD:Music:II:02.mp3")),
            ("B2".to_string(), info("1", "Split Myself in Two", "II", "Macintosh HD:Music:II:01.mp3")),
            ("A1".to_string(), info("1", "Up on the Sun", "Up on the Sun", "")),
            ("C3".to_string(), info("10", "Lake of Fire", "II", "Macintosh HD:Music:II:10.mp3")),
        ]),
        ..Default::default()
    };

    let loader = LibrarySnapshotLoader::new(&player, &snapshot, 3);
    let first = loader.run().unwrap();
    assert_eq!(first.count("collected"), 4);
    assert_eq!(first.count("failed"), 1);

    let rows: Vec<TrackRecord> = read_checkpoint(&snapshot).unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r.persistent_id.as_str()).collect();
    assert_eq!(ids, vec!["B2", "Z9", "C3", "A1"]);
    assert_eq!(rows[0].location, PathBuf::from("/Music/II/01.mp3"));
    assert_eq!(rows[3].location, PathBuf::new());
    assert!(rows[0].last_played.is_some());

    loader.run().unwrap();
    let backups = fs::read_dir(root.path().join("data")).unwrap().count();
    assert_eq!(backups, 2);
}

#[test]
fn exact_miss_retries_with_the_parsed_query() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let incumbent = root.path().join("music/05 Plateau (Live).mp3");
    let candidate = root.path().join("library/Plateau.flac");
    let lake = root.path().join("library/Lake of Fire.flac");

    let mut reader = MapReader::default();
    reader.add(&incumbent, "Plateau", AudioCodec::Mp3, Container::Mpeg, Some(128));
    reader.add(&candidate, "Plateau", AudioCodec::Flac, Container::Flac, Some(900));
    let library = FakeLibrary {
        by_title: HashMap::from([("Plateau".to_string(), candidate.clone()), ("Lake of Fire".to_string(), lake)]),
        ..Default::default()
    };

    fs::create_dir_all(&data).unwrap();
    let snapshot = data.join(SNAPSHOT_FILE_NAME);
    let tracks = vec![
        track("L1", 5, "Plateau (Live)", &incumbent),
        track("L2", 9, "Fire", &root.path().join("music/09 Fire.mp3")),
    ];
    write_checkpoint(&snapshot, &tracks).unwrap();

    let upgrade_settings = settings(vec![SearchStrategy::Exact, SearchStrategy::Parsed]);
    let report = UpgradeCheck::new(&library, &reader, &upgrade_settings, &data).run(&snapshot).unwrap();
    assert_eq!(report.count("BETTER_QUALITY"), 1);
    assert_eq!(report.count("NOT_FOUND"), 1);

    let eligible: Vec<UpgradeCheckRecord> = read_checkpoint(&report.outputs[0]).unwrap();
    assert_eq!(eligible[0].track.persistent_id, "L1");
    assert_eq!(eligible[0].decision.candidate().unwrap().path, candidate);

    let ineligible: Vec<UpgradeCheckRecord> =
        read_checkpoint(latest_checkpoint(&data, INELIGIBLE_PREFIX).unwrap()).unwrap();
    assert_eq!(ineligible[0].track.persistent_id, "L2");
    assert_eq!(ineligible[0].decision.outcome(), UpgradeOutcome::NotFound);
}

#[test]
fn staged_copies_keep_their_album_directories_and_never_share_a_path() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let staging = root.path().join("staging");
    let puppets = touch(&root.path().join("lib/Meat Puppets/II/01 Intro.mp3"), b"AAAA");
    let nirvana = touch(&root.path().join("lib/Nirvana/Bleach/01 Intro.mp3"), b"BBBB");

    let rows = vec![
        better(track("X1", 1, "Intro", &root.path().join("music/a/01 Intro.mp3")), &puppets),
        better(track("X2", 1, "Intro", &root.path().join("music/b/01 Intro.mp3")), &nirvana),
        better(track("X3", 1, "Intro", &root.path().join("music/c/01 Intro.mp3")), &puppets),
    ];
    fs::create_dir_all(&data).unwrap();
    let input = data.join("upgrade_checks_20240305T120000Z.csv");
    write_checkpoint(&input, &rows).unwrap();

    let library = FakeLibrary::default();
    let reader = MapReader::default();
    let writer = RecordingWriter::default();
    let report = Materializer::new(
        &library,
        &reader,
        &writer,
        &library_config(&staging),
        &MaterializeSettings::default(),
        &data,
    )
    .run(&input)
    .unwrap();
    assert_eq!(report.count("materialized"), 2);
    assert_eq!(report.count("failed"), 1);
    assert_eq!(report.count("backed_up"), 0);

    let done: Vec<MaterializedRecord> = read_checkpoint(&report.outputs[0]).unwrap();
    let placed: Vec<_> = done
        .iter()
        .map(|r| (r.check.track.persistent_id.clone(), fs::read(&r.file.path).unwrap()))
        .collect();
    assert_eq!(placed, vec![("X1".to_string(), b"AAAA".to_vec()), ("X2".to_string(), b"BBBB".to_vec())]);
    assert_eq!(done[0].file.path, staging.join("MP3/Meat Puppets/II/01 Intro.mp3"));
    assert_eq!(done[1].file.path, staging.join("MP3/Nirvana/Bleach/01 Intro.mp3"));

    let failed: Vec<MaterializeFailure> = read_checkpoint(latest_checkpoint(&data, FAILED_PREFIX).unwrap()).unwrap();
    assert_eq!(failed[0].check.track.persistent_id, "X3");
    assert!(failed[0].error.contains("already produced"));
}

#[test]
fn failed_year_rewrites_are_recorded_on_the_row() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let candidate = touch(&root.path().join("library/MP3/Meat Puppets/II/03 Magic Toy Missing.mp3"), b"256k");

    let mut row = better(track("Y1", 3, "Magic Toy Missing", &root.path().join("music/03.mp3")), &candidate);
    row.year_action = YearAction::CandidateOriginalYear;
    fs::create_dir_all(&data).unwrap();
    let input = data.join("upgrade_checks_20240305T120000Z.csv");
    write_checkpoint(&input, &[row]).unwrap();

    let library = FakeLibrary::default();
    let reader = MapReader::default();
    let report = Materializer::new(
        &library,
        &reader,
        &ReadOnlyWriter,
        &library_config(&root.path().join("staging")),
        &MaterializeSettings::default(),
        &data,
    )
    .run(&input)
    .unwrap();
    assert_eq!(report.count("materialized"), 1);
    assert_eq!(report.count("year_write_failed"), 1);

    let done: Vec<MaterializedRecord> = read_checkpoint(&report.outputs[0]).unwrap();
    assert_eq!(done[0].year_update, YearUpdate::Failed);
}

#[test]
fn missing_replacement_leaves_the_incumbent_in_place() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let incumbent = touch(&root.path().join("music/04 Aurora Borealis.mp3"), b"only copy");
    let vanished = root.path().join("staging/MP3/04 Aurora Borealis.mp3");

    let rows = vec![MaterializedRecord {
        check: better(track("V1", 4, "Aurora Borealis", &incumbent), &vanished),
        file: MaterializedFile { path: vanished, target_existed: false },
        year_update: YearUpdate::Unchanged,
    }];
    fs::create_dir_all(&data).unwrap();
    let input = data.join("materialized_20240305T120000Z.csv");
    write_checkpoint(&input, &rows).unwrap();

    let player = FakePlayer::default();
    let report = ApplyUpgrade::new(&player, VOLUME, &data).run(&input).unwrap();
    assert_eq!(report.count("apply_failed"), 1);
    assert_eq!(fs::read(&incumbent).unwrap(), b"only copy");
    assert!(player.repointed.lock().unwrap().is_empty());

    let applied: Vec<ApplyRecord> = read_checkpoint(&report.outputs[0]).unwrap();
    assert!(!applied[0].success);
}
