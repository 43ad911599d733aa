//! Report text to LaTeX source.
//!
//! The synthesized report uses a small markdown-like dialect: `**SECTION
//! n: TITLE**` headers, other `**bold**` lines as subheadings, `*` bullets and
//! `key: value` lines. Everything else becomes a plain paragraph.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::{MARKUP_SOURCE, SYNTHESIZED_REPORT};
use crate::errors::CollaboratorError;
use crate::stages::{Collaborator, StageInputs, StageProducts};

/// Values longer than this (after escaping) get their own wrapped line.
const PARBOX_THRESHOLD: usize = 60;

static NRIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([STG][0-9]{7}[A-Z])\b").unwrap());
static LONG_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([0-9]{10,})\b").unwrap());

const PREAMBLE: &str = r"\documentclass[11pt,a4paper]{article}
\usepackage[utf8]{inputenc}
\usepackage[margin=1in]{geometry}
\usepackage{fancyhdr}
\usepackage{graphicx}
\usepackage{tabularx}
\usepackage{booktabs}
\usepackage{enumitem}
\usepackage{url}
\usepackage{hyperref}
\usepackage{xcolor}
\usepackage{tcolorbox}
\usepackage{microtype}
\usepackage{ragged2e}

\setlength{\emergencystretch}{3em}
\tolerance=1000
\hbadness=10000

\setlength{\headheight}{15pt}
\pagestyle{fancy}
\fancyhf{}
\rhead{\thepage}
\lhead{Synthesized Medical Report}

\hyphenpenalty=50
\exhyphenpenalty=50

% Breakable character sequence, for identifiers with no natural break point
\makeatletter
\newcommand{\seqsplit}[1]{%
  \def\@tempa##1{\ifx\relax##1\relax\else##1\discretionary{}{}{}\expandafter\@tempa\fi}%
  \@tempa#1\relax%
}
\makeatother

\setlist[itemize]{leftmargin=20pt, itemsep=2pt, parsep=0pt, topsep=5pt}

\title{Synthesized Medical Report}
\author{Medical Document Processing System}
\date{\today}

\begin{document}
\maketitle

\begin{abstract}
This document contains a synthesized medical report generated from multiple source documents using automated processing. The report maintains chronological order and preserves all relevant medical information from the source materials.
\end{abstract}

\tableofcontents
\newpage

";

const FOOTER_HEAD: &str = r"

\vspace{2cm}

\noindent\rule{\textwidth}{0.5pt}
\begin{center}
\textit{This report was automatically generated from multiple medical documents}\\
\textit{Generated on: ";

const FOOTER_TAIL: &str = r"}
\end{center}

\end{document}
";

/// Escapes LaTeX special characters and makes long identifiers breakable.
#[must_use]
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        match c {
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '^' => out.push_str(r"\^{}"),
            '~' => out.push_str(r"\~{}"),
            '\\' => out.push_str(r"\textbackslash{}"),
            _ => out.push(c),
        }
    }
    let out = NRIC.replace_all(&out, r"\seqsplit{$1}");
    LONG_NUMBER
        .replace_all(&out, r"\seqsplit{$1}")
        .into_owned()
}

/// Rejects characters LaTeX cannot typeset.
fn check_characters(text: &str) -> Result<(), CollaboratorError> {
    for (number, line) in text.lines().enumerate() {
        if let Some(c) = line
            .chars()
            .find(|c| c.is_control() && !matches!(c, '\t' | '\r'))
        {
            return Err(CollaboratorError::permanent(format!(
                "invalid character U+{:04X} on line {}",
                u32::from(c),
                number + 1
            )));
        }
    }
    Ok(())
}

/// Splits `key: value` when the line holds exactly one colon.
fn key_value(line: &str) -> Option<(String, String)> {
    if line.matches(':').count() != 1 {
        return None;
    }
    let (key, value) = line.split_once(':')?;
    let key = key.trim().trim_matches('*').trim();
    if key.is_empty() {
        return None;
    }
    Some((escape_latex(key), escape_latex(value.trim().trim_matches('*').trim())))
}

/// `**text**` headings, with any trailing remark such as `(if applicable)`.
fn heading(line: &str) -> Option<String> {
    let rest = line.strip_prefix("**")?;
    let end = rest.find("**")?;
    let title = rest[..end].trim();
    let trailing = rest[end + 2..].trim();
    if title.is_empty() || title.ends_with(':') || (!trailing.is_empty() && !trailing.starts_with('(')) {
        return None;
    }
    Some(if trailing.is_empty() {
        title.to_string()
    } else {
        format!("{title} {trailing}")
    })
}

struct Body {
    lines: Vec<String>,
    in_list: bool,
}

impl Body {
    fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    fn close_list(&mut self) {
        if self.in_list {
            self.lines.push(r"\end{itemize}".to_string());
            self.in_list = false;
        }
    }

    fn open_list(&mut self) {
        if !self.in_list {
            self.lines.push(r"\begin{itemize}".to_string());
            self.in_list = true;
        }
    }
}

/// Converts report text into the LaTeX body, without preamble.
#[must_use]
pub fn render_body(report: &str) -> String {
    let mut body = Body {
        lines: Vec::new(),
        in_list: false,
    };
    let mut leading_title = true;

    for raw in report.lines() {
        let line = raw.trim();
        if line.is_empty() {
            body.close_list();
            continue;
        }
        if leading_title && line.trim_matches('*').trim().eq_ignore_ascii_case("MEDICAL REPORT") {
            leading_title = false;
            continue;
        }
        leading_title = false;

        if let Some(title) = heading(line) {
            body.close_list();
            let command = if title.starts_with("SECTION") {
                "section"
            } else {
                "subsection"
            };
            body.push(format!(r"\{command}{{{}}}", escape_latex(&title)));
        } else if let Some(item) = line.strip_prefix('*').filter(|_| !line.starts_with("**")) {
            body.open_list();
            let item = item.trim();
            match key_value(item) {
                Some((key, value)) => body.push(format!(r"\item \textbf{{{key}:}} {value}")),
                None => body.push(format!(r"\item {}", escape_latex(item))),
            }
        } else if let Some((key, value)) = key_value(line) {
            body.close_list();
            if value.len() > PARBOX_THRESHOLD {
                body.push(format!(r"\noindent\textbf{{{key}:}} \\"));
                body.push(format!(r"\parbox{{\textwidth}}{{{value}}}"));
            } else {
                body.push(format!(r"\textbf{{{key}:}} {value}"));
            }
        } else {
            body.close_list();
            body.push(escape_latex(line));
        }
        body.push(String::new());
    }
    body.close_list();
    body.lines.join("\n")
}

/// Turns the synthesized report into a complete LaTeX document.
#[derive(Debug, Clone, Default)]
pub struct LatexMarkupGenerator;

impl LatexMarkupGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Renders a complete document.
    pub fn render(&self, report: &str) -> Result<String, CollaboratorError> {
        check_characters(report)?;
        let generated = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        Ok(format!(
            "{PREAMBLE}{}{FOOTER_HEAD}{generated}{FOOTER_TAIL}",
            render_body(report)
        ))
    }
}

#[async_trait]
impl Collaborator for LatexMarkupGenerator {
    fn name(&self) -> &str {
        "latex-markup"
    }

    async fn invoke(&self, inputs: &StageInputs) -> Result<StageProducts, CollaboratorError> {
        let report = inputs.text(SYNTHESIZED_REPORT)?;
        if report.trim().is_empty() {
            return Err(CollaboratorError::permanent("synthesized report is empty"));
        }
        let source = self.render(report)?;
        Ok(StageProducts::new().with(MARKUP_SOURCE, source))
    }
}
