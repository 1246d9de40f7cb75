//! 运行报告.

use lung_berry::pipeline::{Delivery, RunReport, TaskOutcome};
use std::io::{self, Write};
use std::time::Duration;

/// 将任务 `name` 的结局写进 `w` 中.
fn describe_into<W: Write>(name: &str, o: &TaskOutcome, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    writeln!(w, "Task `{name}`:")?;
    match o {
        TaskOutcome::Delivered(Delivery::Clinical(p)) => {
            writeln!(w, "{S4}Status: delivered")?;
            write!(w, "{S4}Artifact: {}", p.display())?;
        }
        TaskOutcome::Delivered(Delivery::Fallback { path, reason }) => {
            writeln!(w, "{S4}Status: delivered (fallback)")?;
            writeln!(w, "{S4}Artifact: {}", path.display())?;
            write!(w, "{S4}Encoding failure: {reason}")?;
        }
        TaskOutcome::Failed(e) => {
            writeln!(w, "{S4}Status: failed")?;
            write!(w, "{S4}Reason: {e}")?;
        }
    }
    Ok(())
}

/// 将整个运行报告写进 `w` 中.
pub fn summarize_into<W: Write>(
    report: &RunReport,
    elapsed: Duration,
    w: &mut W,
) -> io::Result<()> {
    utils::sep_to(&mut *w)?;
    writeln!(w, "Staged CT: {}", report.ct.display())?;
    utils::sep_to(&mut *w)?;

    for (name, outcome) in report.outcomes.iter() {
        describe_into(name, outcome, w)?;
        writeln!(w)?;
        utils::sep_to(&mut *w)?;
    }

    let total = report.outcomes.len();
    let failed = report.failed_count();
    writeln!(
        w,
        "{} of {total} task(s) delivered ({} by fallback), {failed} failed, {:.1} s",
        total - failed,
        report.fallback_count(),
        elapsed.as_secs_f64()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use lung_berry::Error;

    #[test]
    fn test_summary() {
        let report = RunReport {
            ct: "/scratch/ct/ct_0000.nii.gz".into(),
            outcomes: vec![
                (
                    "nodules".into(),
                    TaskOutcome::Delivered(Delivery::Clinical(
                        "out/seg_nodules_ensemble.dcm".into(),
                    )),
                ),
                (
                    "nsclc_rg".into(),
                    TaskOutcome::Delivered(Delivery::Fallback {
                        path: "out/seg_lesions_ensemble.nii.gz".into(),
                        reason: "dcmqi missing".into(),
                    }),
                ),
                (
                    "extra".into(),
                    TaskOutcome::Failed(Error::StructureUnavailable {
                        task: "extra".into(),
                    }),
                ),
            ],
        };
        let mut buf = Vec::new();
        summarize_into(&report, Duration::from_millis(1500), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("Task `nodules`:\n    Status: delivered\n"));
        assert!(text.contains("    Artifact: out/seg_lesions_ensemble.nii.gz\n"));
        assert!(text.contains("    Encoding failure: dcmqi missing"));
        assert!(text.contains("Task `extra`:\n    Status: failed\n"));
        assert!(text.ends_with("2 of 3 task(s) delivered (1 by fallback), 1 failed, 1.5 s\n"));
    }
}
