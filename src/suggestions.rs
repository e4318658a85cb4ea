pub const GENERAL_PROMPTS: &[&str] = &[
    "What does a normal ECG look like?",
    "What are the most common heart rhythm disorders?",
    "Which symptoms should make me see a cardiologist?",
    "How can I keep my heart healthy?",
];

const NORMAL_SINUS_RHYTHM_PROMPTS: &[&str] = &[
    "What does a normal sinus rhythm mean?",
    "Is a normal ECG a guarantee that my heart is healthy?",
    "How often should I get an ECG check-up?",
    "What lifestyle habits help maintain a normal heart rhythm?",
];

const ATRIAL_FIBRILLATION_PROMPTS: &[&str] = &[
    "What is atrial fibrillation?",
    "Does atrial fibrillation increase my risk of stroke?",
    "What treatments are available for atrial fibrillation?",
    "Which triggers can cause an atrial fibrillation episode?",
    "Can I exercise with atrial fibrillation?",
];

const BRADYCARDIA_PROMPTS: &[&str] = &[
    "What causes bradycardia?",
    "When is a slow heart rate dangerous?",
    "Do I need a pacemaker for bradycardia?",
    "Can medications cause bradycardia?",
];

const TACHYCARDIA_PROMPTS: &[&str] = &[
    "What is the difference between sinus tachycardia and other tachycardias?",
    "What can cause a fast heart rate at rest?",
    "When should tachycardia be treated as an emergency?",
    "How is tachycardia usually treated?",
];

const PVC_PROMPTS: &[&str] = &[
    "Are premature ventricular contractions dangerous?",
    "What causes premature ventricular contractions?",
    "Can caffeine or stress cause extra heartbeats?",
    "When do PVCs need treatment?",
];

const LBBB_PROMPTS: &[&str] = &[
    "What is a left bundle branch block?",
    "Is left bundle branch block linked to heart disease?",
    "What follow-up tests are usually done for a bundle branch block?",
    "Does left bundle branch block need treatment?",
];

const RBBB_PROMPTS: &[&str] = &[
    "What is a right bundle branch block?",
    "Is right bundle branch block common in healthy people?",
    "Can right bundle branch block affect my daily activities?",
    "What conditions are associated with right bundle branch block?",
];

const DIAGNOSIS_PROMPTS: &[(&str, &[&str])] = &[
    ("Normal Sinus Rhythm", NORMAL_SINUS_RHYTHM_PROMPTS),
    ("Atrial Fibrillation", ATRIAL_FIBRILLATION_PROMPTS),
    ("Bradycardia", BRADYCARDIA_PROMPTS),
    ("Tachycardia", TACHYCARDIA_PROMPTS),
    ("Premature Ventricular Contraction", PVC_PROMPTS),
    ("Left Bundle Branch Block", LBBB_PROMPTS),
    ("Right Bundle Branch Block", RBBB_PROMPTS),
];

/// Returns the suggested questions for a diagnosis.
///
/// Labels are matched exactly. Absent or unrecognized labels resolve to
/// [`GENERAL_PROMPTS`].
pub fn resolve(diagnosis: Option<&str>) -> &'static [&'static str] {
    diagnosis
        .and_then(|label| {
            DIAGNOSIS_PROMPTS
                .iter()
                .find(|(known, _)| *known == label)
                .map(|(_, prompts)| *prompts)
        })
        .unwrap_or(GENERAL_PROMPTS)
}

pub fn known_diagnoses() -> impl Iterator<Item = &'static str> {
    DIAGNOSIS_PROMPTS.iter().map(|(label, _)| *label)
}
