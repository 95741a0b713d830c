use std::fmt::Write;

use crate::{
    catalog::Catalog,
    model::{ModelCategory, ModelIndex, NO_MODEL_FILE},
};

pub const SAMPLE_IMAGE: &str = "images/sample_food.jpg";

const STYLE: &str = r#"
        body { font-family: -apple-system, "Segoe UI", Roboto, sans-serif; background: #f4f6f8; margin: 0; padding: 24px; }
        .container { max-width: 960px; margin: 0 auto; background: white; border-radius: 12px; padding: 32px; box-shadow: 0 8px 24px rgba(0,0,0,0.08); }
        .row { display: flex; gap: 24px; flex-wrap: wrap; }
        .col { flex: 1; min-width: 280px; }
        .thumb { max-width: 100%; border-radius: 8px; }
        pre { background: #f8f9fb; padding: 12px; border-radius: 8px; min-height: 80px; white-space: pre-wrap; }
        .predict-btn { margin: 4px 4px 0 0; padding: 10px 16px; border: none; border-radius: 6px; background: #2d6cdf; color: white; cursor: pointer; }
        .predict-btn small { display: block; opacity: 0.8; }
        .pred-table, .cm-table { border-collapse: collapse; margin-top: 12px; }
        .pred-table td, .pred-table th, .cm-table td, .cm-table th { border: 1px solid #dde1e6; padding: 6px 10px; }
"#;

const SCRIPT: &str = r#"
        const nutrition = JSON.parse(document.getElementById("nutrition-data").textContent);
        let selectedClass = "";

        function normalize(name) {
            return name.trim().toLowerCase().replace(/ /g, "_");
        }

        document.getElementById("class-dropdown").addEventListener("change", function () {
            selectedClass = this.value;
            const box = document.getElementById("class-details-box");
            if (!selectedClass) {
                box.innerText = "Select a class to view details...";
                return;
            }
            const info =
                nutrition[selectedClass] ||
                nutrition[normalize(selectedClass)] ||
                nutrition[selectedClass.toLowerCase()];
            box.innerText = info ? JSON.stringify(info, null, 2) : "No details found for this class";
        });

        document.querySelectorAll(".predict-btn").forEach(btn => {
            btn.addEventListener("click", async function () {
                const fileInput = document.getElementById("file-input");
                const output = document.getElementById("prediction-output");
                if (!fileInput.files.length) {
                    alert("Please upload an image.");
                    return;
                }

                const original = this.innerHTML;
                this.innerText = "Predicting...";
                this.disabled = true;

                const form = new FormData();
                form.append("file", fileInput.files[0]);
                form.append("model_type", this.dataset.type);
                form.append("selected_class", selectedClass);

                try {
                    const res = await fetch("/predict", { method: "POST", body: form });
                    const data = await res.json();
                    if (!data.success) {
                        output.innerHTML = "";
                        const err = document.createElement("div");
                        err.style.color = "red";
                        err.innerText = "Error: " + data.error;
                        output.appendChild(err);
                    } else {
                        displayResults(data);
                    }
                } catch (err) {
                    output.innerText = "Error: " + err;
                } finally {
                    this.innerHTML = original;
                    this.disabled = false;
                }
            });
        });

        function cell(row, tag, text) {
            const el = document.createElement(tag);
            el.innerText = text;
            row.appendChild(el);
        }

        function displayResults(data) {
            const output = document.getElementById("prediction-output");
            output.innerHTML = "";
            document.getElementById("uploaded-image").src = data.image_url;

            const pct = v => (typeof v === "number" ? (v * 100).toFixed(2) + "%" : "NA");
            const table = document.createElement("table");
            table.className = "pred-table";
            [
                ["Predicted Class", data.predicted_class || "--"],
                ["Selected Class", data.selected_class || "--"],
                ["Model Used", data.model_used || "--"],
                ["Confidence", data.confidence + "%"],
                ["Accuracy", pct(data.accuracy)],
                ["Precision", pct(data.precision)],
                ["Recall", pct(data.recall)],
                ["F1 Score", pct(data.f1_score)],
            ].forEach(([k, v]) => {
                const row = table.insertRow();
                cell(row, "th", k);
                cell(row, "td", v);
            });
            output.appendChild(table);

            const matrix = data.confusion_matrix || [];
            if (matrix.length) {
                const cm = document.createElement("table");
                cm.className = "cm-table";
                const head = cm.insertRow();
                cell(head, "th", "");
                matrix.forEach((_, i) => cell(head, "th", "C" + (i + 1)));
                matrix.forEach((values, i) => {
                    const row = cm.insertRow();
                    cell(row, "th", "C" + (i + 1));
                    values.forEach(v => cell(row, "td", v));
                });
                output.appendChild(cm);
            }
        }
"#;

/// Builds the single page of the app.
pub fn render_landing(
    classes: &[String],
    catalog: &Catalog,
    sample_image: Option<&str>,
    index: &ModelIndex,
) -> String {
    let mut html = String::with_capacity(8 * 1024);

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("    <meta charset=\"UTF-8\">\n");
    html.push_str("    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n");
    html.push_str("    <title>Food Classifier</title>\n");
    let _ = write!(html, "    <style>{STYLE}    </style>\n</head>\n<body>\n");
    html.push_str("<div class=\"container\">\n    <h1>Food Classifier</h1>\n    <div class=\"row\">\n");

    html.push_str("    <div class=\"col\">\n");
    html.push_str("        <label for=\"class-dropdown\">Food class</label>\n");
    html.push_str("        <select id=\"class-dropdown\">\n            <option value=\"\">-- select --</option>\n");
    for class in classes {
        let class = escape_html(class);
        let _ = writeln!(html, "            <option value=\"{class}\">{class}</option>");
    }
    html.push_str("        </select>\n");
    if catalog.is_empty() {
        html.push_str("        <p>No classes in the nutrition catalog.</p>\n");
    }
    html.push_str("        <pre id=\"class-details-box\">Select a class to view details...</pre>\n");
    html.push_str("        <input type=\"file\" id=\"file-input\" accept=\"image/*\">\n        <div>\n");
    for category in ModelCategory::ALL {
        let file = index
            .display_name(category)
            .unwrap_or_else(|| NO_MODEL_FILE.to_string());
        let _ = writeln!(
            html,
            "            <button class=\"predict-btn\" data-type=\"{}\">Predict with {}<small>{}</small></button>",
            category.form_name(),
            category.label(),
            escape_html(&file),
        );
    }
    html.push_str("        </div>\n    </div>\n");

    html.push_str("    <div class=\"col\">\n");
    let src = sample_image.map(escape_html).unwrap_or_default();
    let hidden = if sample_image.is_some() { "" } else { " hidden" };
    let _ = writeln!(
        html,
        "        <img id=\"uploaded-image\" class=\"thumb\" src=\"{src}\" alt=\"Sample food\"{hidden}>"
    );
    html.push_str("        <div id=\"prediction-output\"></div>\n    </div>\n");
    html.push_str("    </div>\n</div>\n");

    let _ = writeln!(
        html,
        "<script type=\"application/json\" id=\"nutrition-data\">{}</script>",
        embed_json(catalog),
    );
    let _ = write!(html, "<script>{SCRIPT}</script>\n</body>\n</html>\n");

    html
}

fn embed_json(catalog: &Catalog) -> String {
    serde_json::to_string(catalog.records())
        .unwrap_or_else(|_| "{}".to_string())
        .replace("</", "<\\/")
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
