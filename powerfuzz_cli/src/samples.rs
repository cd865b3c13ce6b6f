//! Built-in instrumented targets. Each branch reports its own source line.

use powerfuzz_core::CoverageObserver;

pub type Harness = fn(&[u8], &mut CoverageObserver);

pub struct Sample {
    pub id: u32,
    pub name: &'static str,
    pub harness: Harness,
    /// Seeds used when the corpus starts out empty.
    pub default_seeds: &'static [&'static [u8]],
}

pub static SAMPLES: [Sample; 4] = [
    Sample {
        id: 1,
        name: "sample1",
        harness: sample1,
        default_seeds: &[b"good"],
    },
    Sample {
        id: 2,
        name: "sample2",
        harness: sample2,
        default_seeds: &[b"Hello+World", b"a%20b"],
    },
    Sample {
        id: 3,
        name: "sample3",
        harness: sample3,
        default_seeds: &[&[3, b'a', b'b', b'c']],
    },
    Sample {
        id: 4,
        name: "sample4",
        harness: sample4,
        default_seeds: &[b"GET /index.html", b"POST /"],
    },
];

pub fn find(id: u32) -> Option<&'static Sample> {
    SAMPLES.iter().find(|sample| sample.id == id)
}

/// Crashes on inputs starting with `bad!`.
fn sample1(data: &[u8], cov: &mut CoverageObserver) {
    const F: &str = "sample1";
    cov.hit(F, line!());
    if data.first() == Some(&b'b') {
        cov.hit(F, line!());
        if data.get(1) == Some(&b'a') {
            cov.hit(F, line!());
            if data.get(2) == Some(&b'd') {
                cov.hit(F, line!());
                if data.get(3) == Some(&b'!') {
                    cov.hit(F, line!());
                    panic!("bad input");
                }
            }
        }
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// CGI-style decoder: `+` is a space, `%xx` a hex escape. Malformed escapes crash.
fn sample2(data: &[u8], cov: &mut CoverageObserver) {
    const F: &str = "sample2";
    cov.hit(F, line!());
    let mut decoded = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'+' => {
                cov.hit(F, line!());
                decoded.push(b' ');
            }
            b'%' => {
                cov.hit(F, line!());
                let hi = data.get(i + 1).copied().and_then(hex_value);
                let lo = data.get(i + 2).copied().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        cov.hit(F, line!());
                        decoded.push(hi * 16 + lo);
                        i += 2;
                    }
                    _ => {
                        cov.hit(F, line!());
                        panic!("invalid encoding");
                    }
                }
            }
            other => {
                cov.hit(F, line!());
                decoded.push(other);
            }
        }
        i += 1;
    }
    if decoded.is_empty() {
        cov.hit(F, line!());
    }
}

/// Length-prefixed record: the first byte claims the body length.
/// Trusting a claimed length longer than the body crashes.
fn sample3(data: &[u8], cov: &mut CoverageObserver) {
    const F: &str = "sample3";
    cov.hit(F, line!());
    let Some((&claimed, body)) = data.split_first() else {
        cov.hit(F, line!());
        return;
    };
    if claimed == 0 {
        cov.hit(F, line!());
        return;
    }
    if usize::from(claimed) <= body.len() {
        cov.hit(F, line!());
        let checksum = body[..usize::from(claimed)]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        if checksum == 0xFF {
            cov.hit(F, line!());
        }
    } else if claimed > 0x80 {
        cov.hit(F, line!());
        panic!("record length {} exceeds body of {} bytes", claimed, body.len());
    } else {
        cov.hit(F, line!());
    }
}

/// Request-line parser. Deep paths with `..` segments crash.
fn sample4(data: &[u8], cov: &mut CoverageObserver) {
    const F: &str = "sample4";
    cov.hit(F, line!());
    let Ok(text) = std::str::from_utf8(data) else {
        cov.hit(F, line!());
        return;
    };
    let mut parts = text.splitn(2, ' ');
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();
    match method {
        "GET" => cov.hit(F, line!()),
        "POST" => cov.hit(F, line!()),
        "PUT" | "DELETE" => cov.hit(F, line!()),
        _ => {
            cov.hit(F, line!());
            return;
        }
    }
    if !path.starts_with('/') {
        cov.hit(F, line!());
        return;
    }
    let mut depth: i32 = 0;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == ".." {
            cov.hit(F, line!());
            depth -= 1;
            if depth < 0 {
                cov.hit(F, line!());
                panic!("path escapes document root");
            }
        } else {
            depth += 1;
        }
    }
    if depth > 3 {
        cov.hit(F, line!());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerfuzz_core::{InProcessRunner, Outcome, Runner};

    fn outcome_of(sample: u32, input: &[u8]) -> Outcome {
        let sample = find(sample).unwrap();
        let mut runner = InProcessRunner::new(sample.harness);
        runner.execute(input).1
    }

    #[test]
    fn samples_are_numbered_one_to_four() {
        assert!(find(0).is_none());
        assert!(find(5).is_none());
        for id in 1..=4 {
            assert_eq!(find(id).map(|s| s.id), Some(id));
        }
    }

    #[test]
    fn default_seeds_pass() {
        for sample in &SAMPLES {
            for seed in sample.default_seeds {
                assert_eq!(outcome_of(sample.id, seed), Outcome::Pass, "{}", sample.name);
            }
        }
    }

    #[test]
    fn each_sample_has_a_reachable_crash() {
        assert_eq!(outcome_of(1, b"bad!"), Outcome::Fail);
        assert_eq!(outcome_of(2, b"%zz"), Outcome::Fail);
        assert_eq!(outcome_of(3, &[0xF0, 1, 2]), Outcome::Fail);
        assert_eq!(outcome_of(4, b"GET /../etc"), Outcome::Fail);
    }

    #[test]
    fn deeper_branches_report_more_coverage() {
        let sample = find(1).unwrap();
        let mut runner = InProcessRunner::new(sample.harness);
        runner.execute(b"xxxx");
        let shallow = runner.coverage().len();
        runner.execute(b"baxx");
        assert!(runner.coverage().len() > shallow);
    }
}
