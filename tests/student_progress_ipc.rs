mod test_support;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use test_support::{error_code, spawn_sidecar, temp_workspace};

const BANK: &str = "question,answer,level\n\
2+2?,4,1\n\
3+3?,6,1\n\
Square root of 81?,9,2\n\
Derivative of x^2?,2x,4\n";

fn question_ids(listed: &Value) -> Vec<i64> {
    listed["questions"]
        .as_array()
        .expect("questions array")
        .iter()
        .map(|q| q["id"].as_i64().expect("question id"))
        .collect()
}

#[test]
fn levels_unlock_in_order_as_questions_are_attempted() {
    let workspace = temp_workspace("quizd-student-progress");
    let mut sidecar = spawn_sidecar();
    sidecar.open_workspace(&workspace);
    sidecar.create_user("Admin", "admin@example.com", "admin");
    sidecar.sign_in("admin@example.com");
    sidecar.create_user("Sam", "sam@example.com", "student");
    let upload = sidecar.request_ok("admin.questions.upload", json!({ "csvText": BANK }));
    assert_eq!(upload["report"]["insertedCount"], 4);

    sidecar.sign_in("sam@example.com");
    let levels = sidecar.request_ok("student.levels", json!({}));
    assert_eq!(levels["levels"].as_array().map(Vec::len), Some(6));
    assert_eq!(levels["levels"][0]["questionCount"], 2);
    assert_eq!(levels["levels"][2]["hasQuestions"], false);

    let progress = sidecar.request_ok("student.progress", json!({}));
    assert_eq!(progress["unlockedLevel"], 1);
    assert_eq!(progress["completedLevels"], json!([]));
    assert_eq!(progress["levelProgress"]["1"]["totalQuestions"], 2);

    let locked = sidecar.request_err("student.questions.list", json!({ "level": 2 }));
    assert_eq!(error_code(&locked), "level_locked");
    assert_eq!(locked["details"]["unlockedLevel"], 1);

    let random = sidecar.request_ok("student.questions.random", json!({ "level": "1" }));
    assert_eq!(random["question"]["level"], 1);
    assert!(random["question"].get("answerText").is_none());

    let level_one = question_ids(&sidecar.request_ok("student.questions.list", json!({ "level": 1 })));
    assert_eq!(level_one.len(), 2);
    sidecar.request_ok(
        "student.attempts.submit",
        json!({ "questionId": level_one[0], "studentAnswer": "4" }),
    );
    let progress = sidecar.request_ok("student.progress", json!({}));
    assert_eq!(progress["inProgressLevels"], json!([1]));
    assert_eq!(progress["unlockedLevel"], 1);

    sidecar.request_ok(
        "student.attempts.submit",
        json!({ "questionId": level_one[1], "studentAnswer": "6" }),
    );
    let progress = sidecar.request_ok("student.progress", json!({}));
    assert_eq!(progress["completedLevels"], json!([1]));
    assert_eq!(progress["inProgressLevels"], json!([]));
    assert_eq!(progress["unlockedLevel"], 2);

    let level_two = question_ids(&sidecar.request_ok("student.questions.list", json!({ "level": 2 })));
    sidecar.request_ok(
        "student.attempts.submit",
        json!({ "questionId": level_two[0], "studentAnswer": "9" }),
    );

    // Level 3 has no questions, so it can never complete and level 4 stays locked.
    let progress = sidecar.request_ok("student.progress", json!({}));
    assert_eq!(progress["completedLevels"], json!([1, 2]));
    assert_eq!(progress["unlockedLevel"], 3);
    let empty = sidecar.request_err("student.questions.list", json!({ "level": 3 }));
    assert_eq!(error_code(&empty), "not_found");
    let still_locked = sidecar.request_err("student.questions.random", json!({ "level": 4 }));
    assert_eq!(error_code(&still_locked), "level_locked");
}

#[test]
fn attempts_are_validated_and_private_to_their_student() {
    let workspace = temp_workspace("quizd-student-attempts");
    let mut sidecar = spawn_sidecar();
    sidecar.open_workspace(&workspace);
    sidecar.create_user("Admin", "admin@example.com", "admin");
    sidecar.sign_in("admin@example.com");
    sidecar.create_user("Sam", "sam@example.com", "student");
    sidecar.create_user("Kim", "kim@example.com", "student");
    sidecar.request_ok("admin.questions.upload", json!({ "csvText": BANK }));

    sidecar.sign_in("sam@example.com");
    let level_one = question_ids(&sidecar.request_ok("student.questions.list", json!({ "level": 1 })));

    let zero = sidecar.request_err(
        "student.attempts.submit",
        json!({ "questionId": 0, "studentAnswer": "4" }),
    );
    assert_eq!(error_code(&zero), "bad_params");
    let blank = sidecar.request_err(
        "student.attempts.submit",
        json!({ "questionId": level_one[0], "studentAnswer": "   " }),
    );
    assert_eq!(error_code(&blank), "bad_params");
    let missing = sidecar.request_err(
        "student.attempts.submit",
        json!({ "questionId": 9999, "studentAnswer": "4" }),
    );
    assert_eq!(error_code(&missing), "not_found");

    let submitted = sidecar.request_ok(
        "student.attempts.submit",
        json!({ "questionId": level_one[0], "studentAnswer": "  five " }),
    );
    let attempt_id = submitted["attemptId"].as_i64().expect("attempt id");

    let comparison = sidecar.request_ok(
        "student.attempts.comparison",
        json!({ "attemptId": attempt_id }),
    );
    assert_eq!(comparison["comparison"]["question"], "2+2?");
    assert_eq!(comparison["comparison"]["correctAnswer"], "4");
    assert_eq!(comparison["comparison"]["studentAnswer"], "five");

    sidecar.sign_in("kim@example.com");
    let forbidden = sidecar.request_err(
        "student.attempts.comparison",
        json!({ "attemptId": attempt_id }),
    );
    assert_eq!(error_code(&forbidden), "forbidden");
    let unknown = sidecar.request_err(
        "student.attempts.comparison",
        json!({ "attemptId": attempt_id + 100 }),
    );
    assert_eq!(error_code(&unknown), "not_found");

    sidecar.sign_in("admin@example.com");
    let by_email = sidecar.request_ok(
        "admin.submissions.list",
        json!({ "studentEmail": "SAM@", "level": 1 }),
    );
    let rows = by_email["submissions"].as_array().expect("submissions");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["studentName"], "Sam");
    assert_eq!(rows[0]["correctAnswer"], "4");
    let other_level = sidecar.request_ok("admin.submissions.list", json!({ "level": 2 }));
    assert_eq!(other_level["submissions"].as_array().map(Vec::len), Some(0));
}
