use std::io::{self, BufRead, Write};

/// The student being enrolled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentProfile {
    pub name: String,
    pub class: String,
    pub gender: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("student name must not be empty")]
    EmptyName,
    #[error("student name '{0}' cannot be used as a directory name")]
    InvalidName(String),
    #[error("failed to read input: {0}")]
    Input(#[from] io::Error),
}

impl StudentProfile {
    /// Trims every field and upper-cases class and gender.
    pub fn new(name: &str, class: &str, gender: &str) -> Result<Self, ProfileError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProfileError::EmptyName);
        }
        // The name becomes a dataset sub-directory.
        if name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(ProfileError::InvalidName(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            class: class.trim().to_uppercase(),
            gender: gender.trim().to_uppercase(),
        })
    }

    /// Fill missing fields by prompting on `input`, then validate.
    pub fn resolve<R: BufRead, W: Write>(
        name: Option<String>,
        class: Option<String>,
        gender: Option<String>,
        input: &mut R,
        output: &mut W,
    ) -> Result<Self, ProfileError> {
        let name = match name {
            Some(n) => n,
            None => prompt(input, output, "Enter Student Name: ")?,
        };
        let class = match class {
            Some(c) => c,
            None => prompt(input, output, "Enter Class (ex: 7A, 9B, X IPA 2): ")?,
        };
        let gender = match gender {
            Some(g) => g,
            None => prompt(input, output, "Enter Gender (L/P): ")?,
        };
        Self::new(&name, &class, &gender)
    }
}

fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, label: &str) -> io::Result<String> {
    output.write_all(label.as_bytes())?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_fields() {
        let p = StudentProfile::new("  Budi Santoso ", " x ipa 2", "l\n").unwrap();
        assert_eq!(p.name, "Budi Santoso");
        assert_eq!(p.class, "X IPA 2");
        assert_eq!(p.gender, "L");
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(matches!(StudentProfile::new("   ", "7A", "P"), Err(ProfileError::EmptyName)));
    }

    #[test]
    fn path_like_names_are_rejected() {
        for name in ["..", "a/b", "c\\d"] {
            assert!(matches!(
                StudentProfile::new(name, "7A", "P"),
                Err(ProfileError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn prompts_only_for_missing_fields() {
        let mut input = io::Cursor::new(b"9b\np\n".to_vec());
        let mut output = Vec::new();
        let p = StudentProfile::resolve(Some("Sari".into()), None, None, &mut input, &mut output)
            .unwrap();
        assert_eq!(p, StudentProfile::new("Sari", "9B", "P").unwrap());

        let shown = String::from_utf8(output).unwrap();
        assert!(!shown.contains("Student Name"));
        assert!(shown.contains("Enter Class"));
        assert!(shown.contains("Enter Gender"));
    }

    #[test]
    fn closed_stdin_means_empty_name() {
        let mut input = io::Cursor::new(Vec::new());
        let err = StudentProfile::resolve(None, None, None, &mut input, &mut io::sink()).unwrap_err();
        assert!(matches!(err, ProfileError::EmptyName));
    }
}
